use async_trait::async_trait;
use pkg_constants::hns::{DEFAULT_LIMIT_RANGE_NAME, FINALIZER_TEARDOWN};
use pkg_forest::NamespaceForest;
use pkg_state::error::is_conflict;
use pkg_state::hierarchy::{allocated, enforcement_root_depth, holds_quota, uses_local_quota};
use pkg_types::limitrange::LimitRange;
use pkg_types::namespace::Namespace;
use pkg_types::quota::{QuotaAccessor, QuotaKind};
use pkg_types::resources::ResourceList;
use pkg_types::subnamespace::{
    AllocationTotals, ChildAllocation, ResourceQuotaSpec, Subnamespace, SubnamespacePhase,
    SubnamespaceStatus,
};
use tracing::{debug, info, warn};

use crate::labels::{apply_hierarchy, apply_role};
use crate::quota::{delete_quotas, ensure_quota, get_quota};
use crate::{Action, Context, ObjectRef, Reconciler};

/// Keep `ns` under the right enforcement root in the index.
///
/// Namespaces within the root depth enforce locally and are not indexed; the
/// first level below it starts a key; deeper levels join their parent's key.
pub fn ensure_indexed(forest: &NamespaceForest, ns: &Namespace, root_depth: u32) {
    let depth = ns.depth();
    let key = forest.key(&ns.name);
    if depth <= root_depth {
        if key == ns.name {
            forest.delete_key(&key);
        } else if !key.is_empty()
            && let Err(e) = forest.remove_ns(&ns.name, &key)
        {
            debug!("{}", e);
        }
    } else if depth == root_depth + 1 {
        if key != ns.name {
            forest.add_ns(&ns.name, "");
        }
    } else if let Some(parent) = ns.parent()
        && (key.is_empty() || key != forest.key(parent))
    {
        forest.add_ns(&ns.name, parent);
    }
}

/// Drives each Subnamespace through None → {Missing, Migrated} → Created and
/// keeps Created ones in sync with their namespace and quota object.
pub struct SubnamespaceController {
    ctx: Context,
}

impl SubnamespaceController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn reconcile_subnamespace(&self, parent: &str, name: &str) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let Some(mut sns) = store.get_subnamespace(parent, name).await? else {
            debug!("Subnamespace {}/{} is gone", parent, name);
            return Ok(Action::Done);
        };
        if sns.deletion_timestamp.is_some() {
            return Ok(Action::Done);
        }
        let Some(parent_ns) = store.get_namespace(parent).await? else {
            debug!("Subnamespace {}/{}: parent namespace is gone", parent, name);
            return Ok(Action::Done);
        };
        if parent_ns.is_terminating() {
            return Ok(Action::Done);
        }

        match sns.phase() {
            SubnamespacePhase::None => self.setup(&mut sns, &parent_ns).await,
            SubnamespacePhase::Missing | SubnamespacePhase::Migrated => {
                self.adopt(&mut sns, &parent_ns).await
            }
            SubnamespacePhase::Created => self.sync(&mut sns, &parent_ns, false).await,
        }
    }

    fn pool_flag(&self, sns: &Subnamespace, parent: &Namespace, current: Option<bool>) -> bool {
        self.ctx.config.resource_pool_only
            || parent.is_resource_pool()
            || sns.requested_pool().or(current).unwrap_or(false)
    }

    /// First reconciliation: create the namespace and its quota object.
    async fn setup(&self, sns: &mut Subnamespace, parent: &Namespace) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let mut ns = match store.get_namespace(&sns.name).await? {
            Some(existing) if existing.is_terminating() => {
                info!(
                    "Subnamespace {}/{}: waiting for namespace teardown to finish",
                    sns.namespace, sns.name
                );
                return Ok(Action::Requeue(self.ctx.config.requeue_interval));
            }
            Some(existing) => existing,
            None => Namespace::new(&sns.name),
        };
        let pool = self.pool_flag(sns, parent, None);
        apply_hierarchy(&mut ns, parent, pool);
        if !ns.finalizers.iter().any(|f| f == FINALIZER_TEARDOWN) {
            ns.finalizers.push(FINALIZER_TEARDOWN.to_string());
        }
        store.put_namespace(&ns).await?;
        info!(
            "Subnamespace {}/{}: namespace ready (depth={}, pool={})",
            sns.namespace,
            sns.name,
            ns.depth(),
            pool
        );
        self.claim_parent(&parent.name).await?;
        if sns.requested_pool() != Some(pool) {
            sns.set_pool_label(pool);
        }

        if holds_quota(&ns) {
            if sns.hard().is_empty()
                && let Some(q) = get_quota(store, &ns.name).await?
            {
                sns.set_hard(q.used().clone());
            }
            let root_depth =
                enforcement_root_depth(store, &ns, self.ctx.config.root_depth).await?;
            let kind = QuotaKind::from_local_flag(uses_local_quota(ns.depth(), root_depth, pool));
            ensure_quota(store, &ns, kind, sns.hard()).await?;
        }

        if store
            .get_limit_range(&ns.name, DEFAULT_LIMIT_RANGE_NAME)
            .await?
            .is_none()
        {
            store
                .put_limit_range(&LimitRange::new(
                    ns.name.as_str(),
                    DEFAULT_LIMIT_RANGE_NAME,
                    self.ctx.config.default_limits.clone(),
                ))
                .await?;
        }

        sns.status.phase = SubnamespacePhase::Created;
        if let Some(parent_ref) = ObjectRef::subnamespace_of(parent) {
            self.ctx.queue.enqueue(parent_ref);
        }
        self.sync(sns, parent, true).await
    }

    /// Missing and Migrated: the namespace already exists, take it over.
    async fn adopt(&self, sns: &mut Subnamespace, parent: &Namespace) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let Some(mut ns) = store.get_namespace(&sns.name).await? else {
            return self.setup(sns, parent).await;
        };
        let pool = self.pool_flag(sns, parent, Some(ns.is_resource_pool()));
        let mut changed = apply_hierarchy(&mut ns, parent, pool);
        if !ns.finalizers.iter().any(|f| f == FINALIZER_TEARDOWN) {
            ns.finalizers.push(FINALIZER_TEARDOWN.to_string());
            changed = true;
        }
        if changed {
            store.put_namespace(&ns).await?;
        }
        self.claim_parent(&parent.name).await?;
        if sns.requested_pool() != Some(pool) {
            sns.set_pool_label(pool);
        }
        info!(
            "Subnamespace {}/{}: adopted existing namespace (was {})",
            sns.namespace,
            sns.name,
            sns.phase()
        );
        sns.status.phase = SubnamespacePhase::Created;
        if let Some(parent_ref) = ObjectRef::subnamespace_of(parent) {
            self.ctx.queue.enqueue(parent_ref);
        }
        self.sync(sns, parent, true).await
    }

    /// A parent gaining a child loses its Leaf role.
    async fn claim_parent(&self, parent: &str) -> anyhow::Result<()> {
        if let Some(mut p) = self.ctx.store.get_namespace(parent).await?
            && apply_role(&mut p, true)
        {
            self.ctx.store.put_namespace(&p).await?;
        }
        Ok(())
    }

    /// Created: recompute status and converge labels, pool state and quota.
    async fn sync(
        &self,
        sns: &mut Subnamespace,
        parent: &Namespace,
        mut dirty: bool,
    ) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let Some(mut ns) = store.get_namespace(&sns.name).await? else {
            warn!(
                "Subnamespace {}/{}: namespace disappeared, setting it up again",
                sns.namespace, sns.name
            );
            sns.status.phase = SubnamespacePhase::None;
            store.put_subnamespace(sns).await?;
            self.ctx
                .queue
                .enqueue(ObjectRef::subnamespace(&sns.namespace, &sns.name));
            return Ok(Action::Done);
        };
        if ns.is_terminating() {
            return Ok(Action::Done);
        }

        let spec_before = sns.hard().clone();
        let children = store.list_subnamespaces(&sns.name).await?;
        let was_pool = ns.is_resource_pool();
        let pool = self.pool_flag(sns, parent, Some(was_pool));
        if sns.requested_pool() != Some(pool) {
            sns.set_pool_label(pool);
            dirty = true;
        }
        let mut touched_children = false;

        if was_pool && !pool {
            let used = get_quota(store, &ns.name)
                .await?
                .map(|q| q.used().clone())
                .unwrap_or_default();
            info!(
                "Subnamespace {}/{}: left resource pool, declared quota set to usage {}",
                sns.namespace, sns.name, used
            );
            sns.set_hard(used);
            touched_children = true;
        } else if !was_pool && pool {
            for mut child in children.iter().cloned() {
                if child.requested_pool() != Some(true) {
                    child.set_pool_label(true);
                    store.put_subnamespace(&child).await?;
                }
            }
            info!(
                "Subnamespace {}/{}: joined resource pool with {} children",
                sns.namespace,
                sns.name,
                children.len()
            );
            touched_children = true;
        }

        let mut relabeled = apply_hierarchy(&mut ns, parent, pool);
        relabeled |= apply_role(&mut ns, !children.is_empty());
        if relabeled {
            store.put_namespace(&ns).await?;
        }

        let root_depth = enforcement_root_depth(store, &ns, self.ctx.config.root_depth).await?;
        if holds_quota(&ns) {
            if sns.hard().is_empty()
                && let Some(q) = get_quota(store, &ns.name).await?
                && !q.used().is_empty()
            {
                sns.set_hard(q.used().clone());
            }
            let kind = QuotaKind::from_local_flag(uses_local_quota(ns.depth(), root_depth, pool));
            ensure_quota(store, &ns, kind, sns.hard()).await?;
        } else {
            if delete_quotas(store, &ns.name).await? {
                info!(
                    "Subnamespace {}/{}: pooled below {}, quota object removed",
                    sns.namespace, sns.name, parent.name
                );
            }
            if !sns.hard().is_empty() {
                sns.set_hard(ResourceList::new());
            }
        }
        ensure_indexed(&self.ctx.forest, &ns, root_depth);

        let mut namespaces: Vec<ChildAllocation> = children
            .iter()
            .map(|c| ChildAllocation {
                namespace: c.name.clone(),
                resource_quota: ResourceQuotaSpec {
                    hard: c.hard().clone(),
                },
            })
            .collect();
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        let allocated = allocated(&children);
        let free = if holds_quota(&ns) {
            sns.hard().minus(&allocated)
        } else {
            ResourceList::new()
        };
        let status = SubnamespaceStatus {
            phase: SubnamespacePhase::Created,
            namespaces,
            total: AllocationTotals { allocated, free },
        };
        if status != sns.status {
            sns.status = status;
            dirty = true;
        }

        let spec_changed = sns.hard() != &spec_before;
        if (dirty || spec_changed)
            && let Err(e) = store.put_subnamespace(sns).await
        {
            if !is_conflict(&e) {
                return Err(e);
            }
            // written meanwhile; start over from the stored object
            debug!("Subnamespace {}/{}: {:#}", sns.namespace, sns.name, e);
            return Ok(Action::Requeue(self.ctx.config.requeue_interval));
        }
        if spec_changed && let Some(parent_ref) = ObjectRef::subnamespace_of(parent) {
            self.ctx.queue.enqueue(parent_ref);
        }
        if touched_children {
            for child in &children {
                self.ctx
                    .queue
                    .enqueue(ObjectRef::subnamespace(&sns.name, &child.name));
            }
        }
        Ok(Action::Done)
    }
}

#[async_trait]
impl Reconciler for SubnamespaceController {
    fn name(&self) -> &'static str {
        "SubnamespaceController"
    }

    async fn reconcile(&self, target: &ObjectRef) -> anyhow::Result<Action> {
        match target {
            ObjectRef::Subnamespace { namespace, name } => {
                self.reconcile_subnamespace(namespace, name).await
            }
            _ => Ok(Action::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_tree_invariant, create, fixture, ns, pods, settle, sns};
    use pkg_constants::hns::ANNOTATION_RQ_DEPTH;
    use pkg_types::namespace::NamespaceRole;

    #[tokio::test]
    async fn first_level_gets_a_local_quota() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;

        let a = ns(&ctx, "a").await;
        assert_eq!(a.depth(), 1);
        assert_eq!(a.role(), Some(NamespaceRole::Leaf));
        assert!(a.finalizers.contains(&FINALIZER_TEARDOWN.to_string()));
        let q = get_quota(&ctx.store, "a").await.unwrap().unwrap();
        assert_eq!(q.kind(), QuotaKind::NamespaceLocal);
        assert_eq!(q.hard(), &pods("50"));
        assert!(ctx
            .store
            .get_limit_range("a", DEFAULT_LIMIT_RANGE_NAME)
            .await
            .unwrap()
            .is_some());
        assert_eq!(ctx.forest.key("a"), "");

        let s = sns(&ctx, "org", "a").await;
        assert_eq!(s.phase(), SubnamespacePhase::Created);
        assert_eq!(s.status.total.free, pods("50"));
    }

    #[tokio::test]
    async fn deeper_levels_share_an_enforcement_root() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        create(&ctx, &mut rx, "a", "b", pods("25"), false).await;
        create(&ctx, &mut rx, "b", "c", pods("5"), false).await;

        let b = get_quota(&ctx.store, "b").await.unwrap().unwrap();
        assert_eq!(b.kind(), QuotaKind::ClusterWide);
        assert_eq!(ctx.forest.key("b"), "b");
        assert_eq!(ctx.forest.key("c"), "b");
        assert_eq!(ns(&ctx, "a").await.role(), Some(NamespaceRole::NoRole));
        assert_eq!(ns(&ctx, "b").await.role(), Some(NamespaceRole::NoRole));

        let a = sns(&ctx, "org", "a").await;
        assert_eq!(a.status.total.allocated, pods("25"));
        assert_eq!(a.status.total.free, pods("25"));
        assert_eq!(a.status.namespaces.len(), 1);
        assert_tree_invariant(&ctx).await;
    }

    #[tokio::test]
    async fn root_annotation_moves_the_threshold() {
        let (ctx, mut rx) = fixture().await;
        let mut org = ns(&ctx, "org").await;
        org.annotations
            .insert(ANNOTATION_RQ_DEPTH.to_string(), "2".to_string());
        ctx.store.put_namespace(&org).await.unwrap();

        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        create(&ctx, &mut rx, "a", "b", pods("25"), false).await;
        let b = get_quota(&ctx.store, "b").await.unwrap().unwrap();
        assert_eq!(b.kind(), QuotaKind::NamespaceLocal);
        assert_eq!(ctx.forest.key("b"), "");
    }

    #[tokio::test]
    async fn converting_a_pool_keeps_children_pooled() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        create(&ctx, &mut rx, "a", "c", pods("20"), true).await;
        create(&ctx, &mut rx, "c", "d", ResourceList::new(), true).await;
        create(&ctx, &mut rx, "c", "e", ResourceList::new(), true).await;

        assert!(ns(&ctx, "c").await.is_upper_resource_pool());
        assert!(get_quota(&ctx.store, "d").await.unwrap().is_none());

        let mut crq = ctx.store.get_cluster_resource_quota("c").await.unwrap().unwrap();
        crq.status.total.used = pods("7");
        ctx.store.put_cluster_resource_quota(&crq).await.unwrap();

        let mut c = sns(&ctx, "a", "c").await;
        c.set_pool_label(false);
        ctx.store.put_subnamespace(&c).await.unwrap();
        settle(&ctx, &mut rx, vec![ObjectRef::subnamespace("a", "c")]).await;

        let c = sns(&ctx, "a", "c").await;
        assert_eq!(c.hard(), &pods("7"));
        assert!(!ns(&ctx, "c").await.is_resource_pool());
        for child in ["d", "e"] {
            assert_eq!(sns(&ctx, "c", child).await.requested_pool(), Some(true));
            let child_ns = ns(&ctx, child).await;
            assert!(child_ns.is_resource_pool());
            assert!(child_ns.is_upper_resource_pool());
        }
        assert_eq!(sns(&ctx, "org", "a").await.status.total.allocated, pods("7"));
        assert_tree_invariant(&ctx).await;
    }

    #[tokio::test]
    async fn joining_a_pool_pulls_children_in() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "p", pods("10"), false).await;
        create(&ctx, &mut rx, "p", "q", pods("5"), false).await;
        assert!(get_quota(&ctx.store, "q").await.unwrap().is_some());

        let mut p = sns(&ctx, "org", "p").await;
        p.set_pool_label(true);
        ctx.store.put_subnamespace(&p).await.unwrap();
        settle(&ctx, &mut rx, vec![ObjectRef::subnamespace("org", "p")]).await;

        let p_quota = get_quota(&ctx.store, "p").await.unwrap().unwrap();
        assert_eq!(p_quota.kind(), QuotaKind::ClusterWide);
        let q = sns(&ctx, "p", "q").await;
        assert_eq!(q.requested_pool(), Some(true));
        assert!(q.hard().is_empty());
        assert!(!ns(&ctx, "q").await.is_upper_resource_pool());
        assert!(get_quota(&ctx.store, "q").await.unwrap().is_none());
        assert_eq!(sns(&ctx, "org", "p").await.status.total.free, pods("10"));
    }

    #[tokio::test]
    async fn empty_spec_adopts_observed_usage() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "x", ResourceList::new(), true).await;
        let mut crq = ctx.store.get_cluster_resource_quota("x").await.unwrap().unwrap();
        crq.status.total.used = pods("3");
        ctx.store.put_cluster_resource_quota(&crq).await.unwrap();

        settle(&ctx, &mut rx, vec![ObjectRef::subnamespace("org", "x")]).await;
        assert_eq!(sns(&ctx, "org", "x").await.hard(), &pods("3"));
        let crq = ctx.store.get_cluster_resource_quota("x").await.unwrap().unwrap();
        assert_eq!(crq.hard(), &pods("3"));
    }

    #[tokio::test]
    async fn vanished_namespace_is_set_up_again() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        ctx.store.delete_namespace("a").await.unwrap();

        settle(&ctx, &mut rx, vec![ObjectRef::subnamespace("org", "a")]).await;
        assert_eq!(ns(&ctx, "a").await.display_name(), "org/a");
        assert_eq!(sns(&ctx, "org", "a").await.phase(), SubnamespacePhase::Created);
    }

    #[tokio::test]
    async fn migrated_phase_adopts_the_namespace() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        create(&ctx, &mut rx, "org", "e", pods("50"), false).await;

        ctx.store.delete_subnamespace("org", "a").await.unwrap();
        let mut moved = Subnamespace::new("e", "a", pods("50"));
        moved.status.phase = SubnamespacePhase::Migrated;
        ctx.store.put_subnamespace(&moved).await.unwrap();
        settle(&ctx, &mut rx, vec![ObjectRef::subnamespace("e", "a")]).await;

        let a = ns(&ctx, "a").await;
        assert_eq!(a.parent(), Some("e"));
        assert_eq!(a.depth(), 2);
        assert_eq!(ns(&ctx, "e").await.role(), Some(NamespaceRole::NoRole));
        assert_eq!(sns(&ctx, "e", "a").await.phase(), SubnamespacePhase::Created);
    }

    #[test]
    fn index_placement_by_depth() {
        let forest = NamespaceForest::new();
        let root = Namespace::new_root("org");
        let mut a = Namespace::new("a");
        apply_hierarchy(&mut a, &root, false);
        let mut b = Namespace::new("b");
        apply_hierarchy(&mut b, &a, false);
        let mut c = Namespace::new("c");
        apply_hierarchy(&mut c, &b, false);

        ensure_indexed(&forest, &c, 1);
        ensure_indexed(&forest, &b, 1);
        ensure_indexed(&forest, &a, 1);
        assert_eq!(forest.key("c"), "b");
        assert_eq!(forest.key("b"), "b");
        assert_eq!(forest.key("a"), "");

        // raising the threshold makes b local again
        ensure_indexed(&forest, &b, 2);
        assert_eq!(forest.key("b"), "");
    }
}
