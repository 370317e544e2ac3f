use async_trait::async_trait;
use pkg_constants::hns::{DEFAULT_LIMIT_RANGE_NAME, FINALIZER_TEARDOWN};
use pkg_types::namespace::{Namespace, NamespaceRole};
use pkg_types::quota::QuotaAccessor;
use pkg_types::subnamespace::{Subnamespace, SubnamespacePhase};
use tracing::{debug, info, warn};

use crate::labels::apply_role;
use crate::quota::{delete_quotas, get_quota};
use crate::{Action, Context, ObjectRef, Reconciler};

/// Tears hierarchy namespaces down once deletion is requested and recreates
/// the Subnamespace of an orphaned member.
pub struct NamespaceController {
    ctx: Context,
}

impl NamespaceController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn reconcile_namespace(&self, name: &str) -> anyhow::Result<Action> {
        let Some(ns) = self.ctx.store.get_namespace(name).await? else {
            return Ok(Action::Done);
        };
        if !ns.is_in_hierarchy() {
            return Ok(Action::Done);
        }
        if ns.is_terminating() {
            return self.teardown(ns).await;
        }
        if ns.role() != Some(NamespaceRole::Root) {
            self.ensure_subnamespace(&ns).await?;
        }
        Ok(Action::Done)
    }

    async fn teardown(&self, mut ns: Namespace) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let children = store.list_subnamespaces(&ns.name).await?;
        if !children.is_empty() {
            info!(
                "Namespace {}: deletion waits for {} subnamespace(s)",
                ns.name,
                children.len()
            );
            return Ok(Action::Requeue(self.ctx.config.requeue_interval));
        }

        if let Some(parent) = ns.parent() {
            store.delete_subnamespace(parent, &ns.name).await?;
        }
        delete_quotas(store, &ns.name).await?;
        store
            .delete_limit_range(&ns.name, DEFAULT_LIMIT_RANGE_NAME)
            .await?;

        let key = self.ctx.forest.key(&ns.name);
        if key == ns.name {
            self.ctx.forest.delete_key(&key);
        } else if !key.is_empty()
            && let Err(e) = self.ctx.forest.remove_ns(&ns.name, &key)
        {
            warn!("Namespace {}: {}", ns.name, e);
        }

        if let Some(parent) = ns.parent()
            && let Some(mut p) = store.get_namespace(parent).await?
        {
            let remaining = store.list_subnamespaces(parent).await?;
            if apply_role(&mut p, !remaining.is_empty()) {
                store.put_namespace(&p).await?;
            }
            if let Some(parent_ref) = ObjectRef::subnamespace_of(&p) {
                self.ctx.queue.enqueue(parent_ref);
            }
        }

        ns.finalizers.retain(|f| f != FINALIZER_TEARDOWN);
        if ns.finalizers.is_empty() {
            store.delete_namespace(&ns.name).await?;
            info!("Namespace {}: torn down", ns.name);
        } else {
            store.put_namespace(&ns).await?;
            debug!(
                "Namespace {}: released, {} other finalizer(s) remain",
                ns.name,
                ns.finalizers.len()
            );
        }
        Ok(Action::Done)
    }

    /// A member whose Subnamespace vanished gets one back with phase Missing.
    async fn ensure_subnamespace(&self, ns: &Namespace) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let Some(parent) = ns.parent() else {
            return Ok(());
        };
        if store.get_subnamespace(parent, &ns.name).await?.is_some() {
            return Ok(());
        }
        // a migration creates the new object before relabeling the namespace
        let elsewhere = store
            .list_all_subnamespaces()
            .await?
            .into_iter()
            .find(|s| s.name == ns.name);
        if let Some(moved) = elsewhere {
            debug!(
                "Namespace {}: subnamespace is under {} while being moved",
                ns.name, moved.namespace
            );
            return Ok(());
        }
        if store.get_namespace(parent).await?.is_none() {
            warn!(
                "Namespace {}: parent {} is gone, cannot restore its subnamespace",
                ns.name, parent
            );
            return Ok(());
        }

        let hard = get_quota(store, &ns.name)
            .await?
            .map(|q| q.hard().clone())
            .unwrap_or_default();
        let mut sns = Subnamespace::new(parent, ns.name.as_str(), hard);
        sns.set_pool_label(ns.is_resource_pool());
        sns.status.phase = SubnamespacePhase::Missing;
        store.put_subnamespace(&sns).await?;
        warn!(
            "Namespace {}: subnamespace object was missing, recreated under {}",
            ns.name, parent
        );
        self.ctx
            .queue
            .enqueue(ObjectRef::subnamespace(parent, &ns.name));
        Ok(())
    }
}

#[async_trait]
impl Reconciler for NamespaceController {
    fn name(&self) -> &'static str {
        "NamespaceController"
    }

    async fn reconcile(&self, target: &ObjectRef) -> anyhow::Result<Action> {
        match target {
            ObjectRef::Namespace(name) => self.reconcile_namespace(name).await,
            _ => Ok(Action::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create, fixture, ns, pods, settle, sns};

    #[tokio::test]
    async fn teardown_waits_for_children_then_cleans_up() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        create(&ctx, &mut rx, "a", "b", pods("25"), false).await;
        create(&ctx, &mut rx, "b", "c", pods("5"), false).await;

        ctx.store.request_namespace_deletion("b").await.unwrap();
        let controller = NamespaceController::new(ctx.clone());
        let action = controller
            .reconcile(&ObjectRef::Namespace("b".to_string()))
            .await
            .unwrap();
        assert!(matches!(action, Action::Requeue(_)));
        assert!(ns(&ctx, "b").await.is_terminating());

        ctx.store.request_namespace_deletion("c").await.unwrap();
        settle(
            &ctx,
            &mut rx,
            vec![
                ObjectRef::Namespace("c".to_string()),
                ObjectRef::Namespace("b".to_string()),
            ],
        )
        .await;

        for gone in ["b", "c"] {
            assert!(ctx.store.get_namespace(gone).await.unwrap().is_none());
            assert!(get_quota(&ctx.store, gone).await.unwrap().is_none());
            assert_eq!(ctx.forest.key(gone), "");
        }
        assert!(ctx.store.get_subnamespace("a", "b").await.unwrap().is_none());
        assert!(ctx
            .store
            .get_limit_range("b", DEFAULT_LIMIT_RANGE_NAME)
            .await
            .unwrap()
            .is_none());
        assert_eq!(ns(&ctx, "a").await.role(), Some(NamespaceRole::Leaf));
        assert!(sns(&ctx, "org", "a").await.status.total.allocated.is_empty());
    }

    #[tokio::test]
    async fn orphaned_member_gets_its_subnamespace_back() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        ctx.store.delete_subnamespace("org", "a").await.unwrap();

        settle(&ctx, &mut rx, vec![ObjectRef::Namespace("a".to_string())]).await;

        let restored = sns(&ctx, "org", "a").await;
        assert_eq!(restored.hard(), &pods("50"));
        assert_eq!(restored.phase(), SubnamespacePhase::Created);
    }

    #[tokio::test]
    async fn member_in_the_middle_of_a_move_is_not_duplicated() {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "a", pods("50"), false).await;
        create(&ctx, &mut rx, "org", "e", pods("10"), false).await;
        // the new object exists under e, the namespace still names org
        ctx.store.delete_subnamespace("org", "a").await.unwrap();
        let mut moved = Subnamespace::new("e", "a", pods("50"));
        moved.status.phase = SubnamespacePhase::Migrated;
        ctx.store.put_subnamespace(&moved).await.unwrap();

        let controller = NamespaceController::new(ctx.clone());
        controller
            .reconcile(&ObjectRef::Namespace("a".to_string()))
            .await
            .unwrap();
        assert!(ctx.store.get_subnamespace("org", "a").await.unwrap().is_none());
        assert_eq!(ctx.store.list_all_subnamespaces().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn roots_and_plain_namespaces_are_left_alone() {
        let (ctx, _rx) = fixture().await;
        ctx.store.put_namespace(&Namespace::new("plain")).await.unwrap();
        let controller = NamespaceController::new(ctx.clone());
        for name in ["org", "plain"] {
            let action = controller
                .reconcile(&ObjectRef::Namespace(name.to_string()))
                .await
                .unwrap();
            assert_eq!(action, Action::Done);
        }
        assert!(ctx.store.list_all_subnamespaces().await.unwrap().is_empty());
    }
}
