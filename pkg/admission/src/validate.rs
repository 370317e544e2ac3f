use pkg_state::client::StateStore;
use pkg_state::hierarchy::{allocated, descendants, free_resources, holds_quota, is_descendant};
use pkg_types::namespace::{Namespace, NamespaceRole};
use pkg_types::resources::ResourceList;
use pkg_types::subnamespace::{Subnamespace, SubnamespacePhase};
use pkg_types::task::{MigrationHierarchy, UpdateQuota};
use pkg_types::validate::{validate_name, validate_resource_name};

use crate::{Admission, AdmissionResponse, Operation};

/// Check that `sns` may declare `new_hard` instead of its current quota.
///
/// The new amounts must cover what its children hold, and any increase must
/// fit in the parent's free quota. Used by admission and by every edge of a
/// quota move.
pub async fn check_quota_change(
    store: &StateStore,
    sns: &Subnamespace,
    new_hard: &ResourceList,
) -> anyhow::Result<AdmissionResponse> {
    let negative = new_hard.negative_names();
    if !negative.is_empty() {
        return Ok(AdmissionResponse::deny(format!(
            "subnamespace {} would have negative quota for {}",
            sns.name,
            negative.join(", ")
        )));
    }

    if let Some(ns) = store.get_namespace(&sns.name).await?
        && !holds_quota(&ns)
    {
        return Ok(AdmissionResponse::allow());
    }

    let children = store.list_subnamespaces(&sns.name).await?;
    let short = allocated(&children).exceeding(new_hard);
    if !short.is_empty() {
        return Ok(AdmissionResponse::deny(format!(
            "subnamespace {} cannot go below what its children hold for {}",
            sns.name,
            short.join(", ")
        )));
    }

    let increase: ResourceList = new_hard
        .minus(sns.hard())
        .iter()
        .filter(|(_, q)| !q.is_negative() && !q.is_zero())
        .map(|(n, q)| (n.to_string(), q))
        .collect();
    if increase.is_empty() {
        return Ok(AdmissionResponse::allow());
    }
    let Some(parent) = store.get_namespace(&sns.namespace).await? else {
        return Ok(AdmissionResponse::deny(format!(
            "parent namespace {} does not exist",
            sns.namespace
        )));
    };
    if !holds_quota(&parent) {
        return Ok(AdmissionResponse::allow());
    }
    let free = free_resources(store, &parent).await?.unwrap_or_default();
    let over = increase.exceeding(&free);
    if !over.is_empty() {
        return Ok(AdmissionResponse::deny(format!(
            "not enough free quota in {} for {}: requested {}, free {}",
            parent.name,
            over.join(", "),
            increase,
            free.restricted_to(&increase)
        )));
    }
    Ok(AdmissionResponse::allow())
}

fn invalid_resource_names(list: &ResourceList) -> Vec<String> {
    list.names()
        .filter(|n| validate_resource_name(n).is_err())
        .map(str::to_string)
        .collect()
}

impl Admission {
    /// Subnamespace create/update/delete.
    pub async fn validate_subnamespace(
        &self,
        user: &str,
        op: Operation,
        old: Option<&Subnamespace>,
        sns: &Subnamespace,
    ) -> anyhow::Result<AdmissionResponse> {
        if self.config.no_webhooks {
            return Ok(AdmissionResponse::allow());
        }
        if !self.authorized(user, op, &sns.namespace).await {
            return Ok(AdmissionResponse::deny(format!(
                "{} may not {} subnamespaces in {}",
                user,
                op.verb(),
                sns.namespace
            )));
        }
        match op {
            Operation::Create => self.validate_subnamespace_create(sns).await,
            Operation::Update => match old {
                Some(old) => self.validate_subnamespace_update(old, sns).await,
                None => self.validate_subnamespace_create(sns).await,
            },
            Operation::Delete => self.validate_subnamespace_delete(sns).await,
        }
    }

    async fn validate_subnamespace_create(
        &self,
        sns: &Subnamespace,
    ) -> anyhow::Result<AdmissionResponse> {
        if let Err(e) = validate_name(&sns.name) {
            return Ok(AdmissionResponse::deny(e.to_string()));
        }
        let Some(parent) = self.store.get_namespace(&sns.namespace).await? else {
            return Ok(AdmissionResponse::deny(format!(
                "parent namespace {} does not exist",
                sns.namespace
            )));
        };
        if !parent.is_in_hierarchy() {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is not part of a hierarchy",
                parent.name
            )));
        }
        if parent.is_terminating() {
            return Ok(AdmissionResponse::deny(format!(
                "parent namespace {} is being deleted",
                parent.name
            )));
        }
        if sns.phase() == SubnamespacePhase::None
            && self.store.get_namespace(&sns.name).await?.is_some()
        {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} already exists",
                sns.name
            )));
        }

        let bad = invalid_resource_names(sns.hard());
        if !bad.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "invalid resource names: {}",
                bad.join(", ")
            )));
        }
        let negative = sns.hard().negative_names();
        if !negative.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "negative quota for {}",
                negative.join(", ")
            )));
        }

        let pool = sns.requested_pool().unwrap_or(false);
        if !pool && parent.is_resource_pool() {
            return Ok(AdmissionResponse::deny(format!(
                "subnamespace {} must be a resource pool: parent {} is one",
                sns.name, parent.name
            )));
        }

        let key = self.forest.key(&parent.name);
        if !key.is_empty() && self.forest.key_count(&key) + 1 > self.config.max_subnamespaces {
            return Ok(AdmissionResponse::deny(format!(
                "hierarchy under {} already holds the maximum of {} subnamespaces",
                key, self.config.max_subnamespaces
            )));
        }

        if !holds_quota(&parent) {
            return Ok(AdmissionResponse::allow());
        }
        let Some(free) = free_resources(&self.store, &parent).await? else {
            if pool && sns.hard().is_empty() {
                return Ok(AdmissionResponse::allow());
            }
            return Ok(AdmissionResponse::deny(format!(
                "parent namespace {} declares no quota",
                parent.name
            )));
        };
        if !pool {
            let missing = sns.hard().missing_names(&free);
            if !missing.is_empty() {
                return Ok(AdmissionResponse::deny(format!(
                    "subnamespace {} must declare {}",
                    sns.name,
                    missing.join(", ")
                )));
            }
        }
        let over = sns.hard().exceeding(&free);
        if !over.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "not enough free quota in {} for {}: requested {}, free {}",
                parent.name,
                over.join(", "),
                sns.hard(),
                free.restricted_to(sns.hard())
            )));
        }
        Ok(AdmissionResponse::allow())
    }

    async fn validate_subnamespace_update(
        &self,
        old: &Subnamespace,
        sns: &Subnamespace,
    ) -> anyhow::Result<AdmissionResponse> {
        let was_pool = old.requested_pool().unwrap_or(false);
        let is_pool = sns.requested_pool().unwrap_or(false);
        if was_pool && !is_pool
            && let Some(parent) = self.store.get_namespace(&sns.namespace).await?
            && parent.is_resource_pool()
        {
            return Ok(AdmissionResponse::deny(format!(
                "subnamespace {} cannot leave the resource pool of {}",
                sns.name, parent.name
            )));
        }

        let bad = invalid_resource_names(sns.hard());
        if !bad.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "invalid resource names: {}",
                bad.join(", ")
            )));
        }
        if old.hard() == sns.hard() {
            return Ok(AdmissionResponse::allow());
        }
        check_quota_change(&self.store, old, sns.hard()).await
    }

    async fn validate_subnamespace_delete(
        &self,
        sns: &Subnamespace,
    ) -> anyhow::Result<AdmissionResponse> {
        match self.store.get_namespace(&sns.name).await? {
            Some(ns) if !ns.is_terminating() => Ok(AdmissionResponse::deny(format!(
                "subnamespace {} is removed by deleting namespace {}",
                sns.name, sns.name
            ))),
            _ => Ok(AdmissionResponse::allow()),
        }
    }

    /// Namespace deletion: refused while the namespace still has children.
    pub async fn validate_namespace_delete(
        &self,
        user: &str,
        name: &str,
    ) -> anyhow::Result<AdmissionResponse> {
        if self.config.no_webhooks {
            return Ok(AdmissionResponse::allow());
        }
        let Some(ns) = self.store.get_namespace(name).await? else {
            return Ok(AdmissionResponse::allow());
        };
        if !ns.is_in_hierarchy() {
            return Ok(AdmissionResponse::allow());
        }
        let scope = ns.parent().unwrap_or(&ns.name).to_string();
        if !self.authorized(user, Operation::Delete, &scope).await {
            return Ok(AdmissionResponse::deny(format!(
                "{} may not delete namespace {}",
                user, name
            )));
        }
        let children = self.store.list_subnamespaces(name).await?;
        if !children.is_empty() {
            let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} still has subnamespaces: {}",
                name,
                names.join(", ")
            )));
        }
        Ok(AdmissionResponse::allow())
    }

    /// RoleBinding deletion: propagated copies stay while their namespace lives.
    pub async fn validate_role_binding_delete(
        &self,
        user: &str,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<AdmissionResponse> {
        if self.config.no_webhooks {
            return Ok(AdmissionResponse::allow());
        }
        if !self.authorized(user, Operation::Delete, namespace).await {
            return Ok(AdmissionResponse::deny(format!(
                "{} may not delete role bindings in {}",
                user, namespace
            )));
        }
        let Some(rb) = self.store.get_role_binding(namespace, name).await? else {
            return Ok(AdmissionResponse::allow());
        };
        let Some(source) = rb.propagated_from() else {
            return Ok(AdmissionResponse::allow());
        };
        match self.store.get_namespace(namespace).await? {
            Some(ns) if !ns.is_terminating() => Ok(AdmissionResponse::deny(format!(
                "role binding {} was propagated from {}; remove it there",
                rb.name, source
            ))),
            _ => Ok(AdmissionResponse::allow()),
        }
    }

    /// MigrationHierarchy create/update.
    pub async fn validate_migration(
        &self,
        user: &str,
        op: Operation,
        old: Option<&MigrationHierarchy>,
        mh: &MigrationHierarchy,
    ) -> anyhow::Result<AdmissionResponse> {
        if self.config.no_webhooks || op == Operation::Delete {
            return Ok(AdmissionResponse::allow());
        }
        if let Some(old) = old {
            if old.spec.current_namespace != mh.spec.current_namespace
                || old.spec.to_namespace != mh.spec.to_namespace
            {
                return Ok(AdmissionResponse::deny(format!(
                    "migration {} cannot be changed once created",
                    mh.name
                )));
            }
            return Ok(AdmissionResponse::allow());
        }

        let current_name = &mh.spec.current_namespace;
        let to_name = &mh.spec.to_namespace;
        if current_name == to_name {
            return Ok(AdmissionResponse::deny(format!(
                "cannot migrate {} under itself",
                current_name
            )));
        }
        let Some(current) = self.hierarchy_member(current_name).await? else {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is not a live hierarchy member",
                current_name
            )));
        };
        let Some(to) = self.hierarchy_member(to_name).await? else {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is not a live hierarchy member",
                to_name
            )));
        };
        if current.role() == Some(NamespaceRole::Root) {
            return Ok(AdmissionResponse::deny(format!(
                "cluster root {} cannot be migrated",
                current_name
            )));
        }
        if current.cluster_root() != to.cluster_root() {
            return Ok(AdmissionResponse::deny(format!(
                "cannot migrate {} across cluster roots ({} to {})",
                current_name,
                current.cluster_root(),
                to.cluster_root()
            )));
        }
        if current.parent() == Some(to_name.as_str()) {
            return Ok(AdmissionResponse::deny(format!(
                "{} is already a child of {}",
                current_name, to_name
            )));
        }
        if is_descendant(&to, current_name) {
            return Ok(AdmissionResponse::deny(format!(
                "cannot migrate {} under its own descendant {}",
                current_name, to_name
            )));
        }
        let old_parent = current.parent().unwrap_or_default();
        for scope in [old_parent, to_name.as_str()] {
            if !self.authorized(user, Operation::Update, scope).await {
                return Ok(AdmissionResponse::deny(format!(
                    "{} may not move subnamespaces in {}",
                    user, scope
                )));
            }
        }

        let busy = self.store.list_migrations().await?.into_iter().any(|other| {
            other.name != mh.name
                && !other.status.phase.is_terminal()
                && other.spec.current_namespace == *current_name
        });
        if busy {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is already being migrated",
                current_name
            )));
        }

        let subtree = descendants(&self.store, current_name).await?.len() + 1;
        let key = self.forest.key(to_name);
        if !key.is_empty() && self.forest.key_count(&key) + subtree > self.config.max_subnamespaces
        {
            return Ok(AdmissionResponse::deny(format!(
                "hierarchy under {} cannot take {} more subnamespaces (maximum {})",
                key, subtree, self.config.max_subnamespaces
            )));
        }

        if holds_quota(&current)
            && let Some(sns) = self.store.get_subnamespace(old_parent, current_name).await?
            && !sns.hard().is_empty()
        {
            let free = free_resources(&self.store, &to).await?.unwrap_or_default();
            let over = sns.hard().exceeding(&free);
            if !over.is_empty() {
                return Ok(AdmissionResponse::deny(format!(
                    "not enough free quota in {} to receive {}: needs {}, free {}",
                    to_name,
                    current_name,
                    sns.hard(),
                    free.restricted_to(sns.hard())
                )));
            }
        }
        Ok(AdmissionResponse::allow())
    }

    /// UpdateQuota create/update.
    pub async fn validate_update_quota(
        &self,
        user: &str,
        op: Operation,
        old: Option<&UpdateQuota>,
        uq: &UpdateQuota,
    ) -> anyhow::Result<AdmissionResponse> {
        if self.config.no_webhooks || op == Operation::Delete {
            return Ok(AdmissionResponse::allow());
        }
        if let Some(old) = old {
            if old.spec.source_namespace != uq.spec.source_namespace
                || old.spec.dest_namespace != uq.spec.dest_namespace
                || old.spec.resource_quota != uq.spec.resource_quota
            {
                return Ok(AdmissionResponse::deny(format!(
                    "quota move {} cannot be changed once created",
                    uq.name
                )));
            }
            return Ok(AdmissionResponse::allow());
        }

        let source_name = &uq.spec.source_namespace;
        let dest_name = &uq.spec.dest_namespace;
        let amounts = &uq.spec.resource_quota.hard;
        if source_name == dest_name {
            return Ok(AdmissionResponse::deny(
                "source and destination must differ",
            ));
        }
        if amounts.is_empty() {
            return Ok(AdmissionResponse::deny("no resources to move"));
        }
        let not_positive: Vec<String> = amounts
            .iter()
            .filter(|(_, q)| q.is_negative() || q.is_zero())
            .map(|(n, _)| n.to_string())
            .collect();
        if !not_positive.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "amounts must be positive: {}",
                not_positive.join(", ")
            )));
        }
        let bad = invalid_resource_names(amounts);
        if !bad.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "invalid resource names: {}",
                bad.join(", ")
            )));
        }

        let Some(source) = self.hierarchy_member(source_name).await? else {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is not a live hierarchy member",
                source_name
            )));
        };
        let Some(dest) = self.hierarchy_member(dest_name).await? else {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is not a live hierarchy member",
                dest_name
            )));
        };
        if source.cluster_root() != dest.cluster_root() {
            return Ok(AdmissionResponse::deny(format!(
                "{} and {} belong to different cluster roots",
                source_name, dest_name
            )));
        }
        for scope in [source_name, dest_name] {
            if !self.authorized(user, Operation::Update, scope).await {
                return Ok(AdmissionResponse::deny(format!(
                    "{} may not move quota in {}",
                    user, scope
                )));
            }
        }

        let Some(free) = free_resources(&self.store, &source).await? else {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} declares no quota",
                source_name
            )));
        };
        let over = amounts.exceeding(&free);
        if !over.is_empty() {
            return Ok(AdmissionResponse::deny(format!(
                "not enough free quota in {} for {}: requested {}, free {}",
                source_name,
                over.join(", "),
                amounts,
                free.restricted_to(amounts)
            )));
        }
        Ok(AdmissionResponse::allow())
    }

    async fn hierarchy_member(&self, name: &str) -> anyhow::Result<Option<Namespace>> {
        Ok(self
            .store
            .get_namespace(name)
            .await?
            .filter(|ns| ns.is_in_hierarchy() && !ns.is_terminating()))
    }
}
