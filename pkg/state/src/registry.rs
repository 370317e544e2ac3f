//! Typed access to the objects of each kind.

use pkg_constants::state::{
    CLUSTER_RESOURCE_QUOTAS_PREFIX, LIMIT_RANGES_PREFIX, MIGRATION_HIERARCHIES_PREFIX,
    NAMESPACES_PREFIX, RESOURCE_QUOTAS_PREFIX, ROLE_BINDINGS_PREFIX, SUBNAMESPACES_PREFIX,
    UPDATE_QUOTAS_PREFIX,
};
use pkg_types::limitrange::LimitRange;
use pkg_types::namespace::Namespace;
use pkg_types::quota::{ClusterResourceQuota, ResourceQuota};
use pkg_types::rbac::RoleBinding;
use pkg_types::resources::ResourceList;
use pkg_types::subnamespace::Subnamespace;
use pkg_types::task::{MigrationHierarchy, UpdateQuota};

use crate::client::{StateStore, Versioned};

impl Versioned for Subnamespace {
    fn resource_version(&self) -> u64 {
        self.resource_version
    }

    fn set_resource_version(&mut self, version: u64) {
        self.resource_version = version;
    }
}

// --- Keys ---

pub fn namespace_key(name: &str) -> String {
    format!("{}{}", NAMESPACES_PREFIX, name)
}

pub fn subnamespace_key(parent: &str, name: &str) -> String {
    format!("{}{}/{}", SUBNAMESPACES_PREFIX, parent, name)
}

pub fn resource_quota_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", RESOURCE_QUOTAS_PREFIX, namespace, name)
}

pub fn cluster_resource_quota_key(name: &str) -> String {
    format!("{}{}", CLUSTER_RESOURCE_QUOTAS_PREFIX, name)
}

pub fn limit_range_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", LIMIT_RANGES_PREFIX, namespace, name)
}

pub fn role_binding_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", ROLE_BINDINGS_PREFIX, namespace, name)
}

pub fn migration_key(name: &str) -> String {
    format!("{}{}", MIGRATION_HIERARCHIES_PREFIX, name)
}

pub fn update_quota_key(name: &str) -> String {
    format!("{}{}", UPDATE_QUOTAS_PREFIX, name)
}

impl StateStore {
    // ============================================================
    // Namespaces
    // ============================================================

    pub async fn get_namespace(&self, name: &str) -> anyhow::Result<Option<Namespace>> {
        self.get_json(&namespace_key(name)).await
    }

    pub async fn put_namespace(&self, ns: &Namespace) -> anyhow::Result<()> {
        self.put_json(&namespace_key(&ns.name), ns).await
    }

    pub async fn delete_namespace(&self, name: &str) -> anyhow::Result<()> {
        self.delete(&namespace_key(name)).await
    }

    pub async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        self.list_json(NAMESPACES_PREFIX).await
    }

    /// Ask for a namespace to go away: removed at once without finalizers,
    /// otherwise marked with a deletion timestamp for its controller.
    ///
    /// This is the write a hosting API server performs for a namespace DELETE
    /// once `validate_namespace_delete` admitted it; the controllers only
    /// react to the resulting timestamp.
    pub async fn request_namespace_deletion(&self, name: &str) -> anyhow::Result<()> {
        let Some(mut ns) = self.get_namespace(name).await? else {
            return Ok(());
        };
        if ns.finalizers.is_empty() {
            return self.delete_namespace(name).await;
        }
        if ns.deletion_timestamp.is_none() {
            ns.deletion_timestamp = Some(chrono::Utc::now());
            self.put_namespace(&ns).await?;
        }
        Ok(())
    }

    // ============================================================
    // Subnamespaces
    // ============================================================

    pub async fn get_subnamespace(
        &self,
        parent: &str,
        name: &str,
    ) -> anyhow::Result<Option<Subnamespace>> {
        self.get_json(&subnamespace_key(parent, name)).await
    }

    /// Write `sns` unless it changed since it was read; a stale copy fails
    /// with [`crate::error::StoreError::Conflict`]. Returns the new version.
    pub async fn put_subnamespace(&self, sns: &Subnamespace) -> anyhow::Result<u64> {
        self.put_versioned(&subnamespace_key(&sns.namespace, &sns.name), sns)
            .await
    }

    pub async fn delete_subnamespace(&self, parent: &str, name: &str) -> anyhow::Result<()> {
        self.delete_json_if::<Subnamespace, _>(&subnamespace_key(parent, name), |_| true)
            .await
            .map(|_| ())
    }

    /// Delete `parent/name` only while it still declares `hard`.
    pub async fn delete_subnamespace_declaring(
        &self,
        parent: &str,
        name: &str,
        hard: &ResourceList,
    ) -> anyhow::Result<bool> {
        self.delete_json_if::<Subnamespace, _>(&subnamespace_key(parent, name), |s| {
            s.hard() == hard
        })
        .await
    }

    /// Subnamespaces requested inside `parent`, i.e. its children.
    pub async fn list_subnamespaces(&self, parent: &str) -> anyhow::Result<Vec<Subnamespace>> {
        self.list_json(&format!("{}{}/", SUBNAMESPACES_PREFIX, parent))
            .await
    }

    pub async fn list_all_subnamespaces(&self) -> anyhow::Result<Vec<Subnamespace>> {
        self.list_json(SUBNAMESPACES_PREFIX).await
    }

    // ============================================================
    // Quota objects
    // ============================================================

    pub async fn get_resource_quota(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<ResourceQuota>> {
        self.get_json(&resource_quota_key(namespace, name)).await
    }

    pub async fn put_resource_quota(&self, rq: &ResourceQuota) -> anyhow::Result<()> {
        self.put_json(&resource_quota_key(&rq.namespace, &rq.name), rq)
            .await
    }

    pub async fn delete_resource_quota(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.delete(&resource_quota_key(namespace, name)).await
    }

    pub async fn get_cluster_resource_quota(
        &self,
        name: &str,
    ) -> anyhow::Result<Option<ClusterResourceQuota>> {
        self.get_json(&cluster_resource_quota_key(name)).await
    }

    pub async fn put_cluster_resource_quota(
        &self,
        crq: &ClusterResourceQuota,
    ) -> anyhow::Result<()> {
        self.put_json(&cluster_resource_quota_key(&crq.name), crq)
            .await
    }

    pub async fn delete_cluster_resource_quota(&self, name: &str) -> anyhow::Result<()> {
        self.delete(&cluster_resource_quota_key(name)).await
    }

    // ============================================================
    // Limit ranges and role bindings
    // ============================================================

    pub async fn get_limit_range(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<LimitRange>> {
        self.get_json(&limit_range_key(namespace, name)).await
    }

    pub async fn put_limit_range(&self, lr: &LimitRange) -> anyhow::Result<()> {
        self.put_json(&limit_range_key(&lr.namespace, &lr.name), lr)
            .await
    }

    pub async fn delete_limit_range(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.delete(&limit_range_key(namespace, name)).await
    }

    /// Read by admission when a RoleBinding deletion is reviewed.
    pub async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<RoleBinding>> {
        self.get_json(&role_binding_key(namespace, name)).await
    }

    /// Role bindings are written by the hosting API server, including the
    /// propagated copies it labels with their source namespace.
    pub async fn put_role_binding(&self, rb: &RoleBinding) -> anyhow::Result<()> {
        self.put_json(&role_binding_key(&rb.namespace, &rb.name), rb)
            .await
    }

    // ============================================================
    // Tasks
    // ============================================================

    pub async fn get_migration(&self, name: &str) -> anyhow::Result<Option<MigrationHierarchy>> {
        self.get_json(&migration_key(name)).await
    }

    pub async fn put_migration(&self, mh: &MigrationHierarchy) -> anyhow::Result<()> {
        self.put_json(&migration_key(&mh.name), mh).await
    }

    pub async fn list_migrations(&self) -> anyhow::Result<Vec<MigrationHierarchy>> {
        self.list_json(MIGRATION_HIERARCHIES_PREFIX).await
    }

    pub async fn get_update_quota(&self, name: &str) -> anyhow::Result<Option<UpdateQuota>> {
        self.get_json(&update_quota_key(name)).await
    }

    pub async fn put_update_quota(&self, uq: &UpdateQuota) -> anyhow::Result<()> {
        self.put_json(&update_quota_key(&uq.name), uq).await
    }

    pub async fn list_update_quotas(&self) -> anyhow::Result<Vec<UpdateQuota>> {
        self.list_json(UPDATE_QUOTAS_PREFIX).await
    }
}
