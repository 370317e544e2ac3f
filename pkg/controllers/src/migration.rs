//! Re-parenting of a subtree as a saga of persisted steps.
//!
//! The cluster root's quota is temporarily inflated by the subtree's
//! allocation and that headroom is moved down to the destination before the
//! Subnamespace object changes parents. Once the subtree is relabeled, the
//! allocation travels from the old parent back to the root and the headroom
//! is released. Every step is recorded in the task status, so a restart
//! resumes at the step it stopped.

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use pkg_constants::hns::ANNOTATION_MIGRATION_HEADROOM_PREFIX;
use pkg_state::hierarchy::{
    descendants, enforcement_root_depth, free_resources, holds_quota, is_descendant,
};
use pkg_types::namespace::{Namespace, NamespaceRole};
use pkg_types::resources::ResourceList;
use pkg_types::subnamespace::{ResourceQuotaSpec, Subnamespace, SubnamespacePhase};
use pkg_types::task::{MigrationHierarchy, MigrationStep, TaskPhase, UpdateQuota};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::labels::apply_hierarchy;
use crate::retry::poll_until;
use crate::subnamespace::ensure_indexed;
use crate::{Action, Context, ObjectRef, Reconciler};

enum Progress {
    /// Step finished, run the next one now.
    Advance(MigrationStep),
    /// Waiting on a quota move.
    Wait,
    Finished,
}

pub struct MigrationController {
    ctx: Context,
}

impl MigrationController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn reconcile_migration(&self, name: &str) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let Some(mut mh) = store.get_migration(name).await? else {
            return Ok(Action::Done);
        };
        if mh.status.phase.is_terminal() {
            return Ok(Action::Done);
        }

        if mh.status.phase == TaskPhase::None {
            if let Err(e) = self.begin(&mut mh).await {
                return self.fail(&mut mh, e).await;
            }
            mh.status.phase = TaskPhase::InProgress;
            mh.status.step = MigrationStep::PreStage;
            store.put_migration(&mh).await?;
            info!(
                "MigrationHierarchy {}: moving {} from {} to {} (allocation {})",
                mh.name,
                mh.spec.current_namespace,
                mh.status.old_parent,
                mh.spec.to_namespace,
                mh.status.allocation.hard
            );
        }

        loop {
            match self.run_step(&mh).await {
                Ok(Progress::Advance(next)) => {
                    debug!(
                        "MigrationHierarchy {}: {} -> {}",
                        mh.name, mh.status.step, next
                    );
                    mh.status.step = next;
                    store.put_migration(&mh).await?;
                }
                Ok(Progress::Wait) => {
                    return Ok(Action::Requeue(self.ctx.config.requeue_interval));
                }
                Ok(Progress::Finished) => {
                    mh.status.phase = TaskPhase::Complete;
                    mh.status.reason.clear();
                    store.put_migration(&mh).await?;
                    info!(
                        "MigrationHierarchy {}: {} now lives under {}",
                        mh.name, mh.spec.current_namespace, mh.spec.to_namespace
                    );
                    return Ok(Action::Done);
                }
                Err(e) => return self.fail(&mut mh, e).await,
            }
        }
    }

    async fn fail(&self, mh: &mut MigrationHierarchy, e: anyhow::Error) -> anyhow::Result<Action> {
        warn!(
            "MigrationHierarchy {}: failed at {}: {:#}",
            mh.name, mh.status.step, e
        );
        mh.status.phase = TaskPhase::Error;
        mh.status.reason = format!("{:#}", e);
        match self.release_headroom(mh).await {
            Ok(Some(kept)) => {
                warn!("MigrationHierarchy {}: {}", mh.name, kept);
                mh.status.reason = format!("{}; {}", mh.status.reason, kept);
            }
            Ok(None) => {}
            Err(cleanup) => warn!(
                "MigrationHierarchy {}: could not inspect root headroom: {:#}",
                mh.name, cleanup
            ),
        }
        self.ctx.store.put_migration(mh).await?;
        Ok(Action::Done)
    }

    /// After a failure, take the root headroom back if no quota reached the
    /// destination yet. Otherwise it stays, and the returned note says where.
    async fn release_headroom(&self, mh: &MigrationHierarchy) -> anyhow::Result<Option<String>> {
        let allocation = &mh.status.allocation.hard;
        if allocation.is_empty() {
            return Ok(None);
        }
        let store = &self.ctx.store;
        let anchor = match store.get_namespace(&mh.spec.to_namespace).await? {
            Some(dest) => dest,
            None => store
                .get_namespace(&mh.spec.current_namespace)
                .await?
                .with_context(|| format!("namespace {} not found", mh.spec.current_namespace))?,
        };
        let root = anchor.cluster_root().to_string();
        let marker = format!("{}{}", ANNOTATION_MIGRATION_HEADROOM_PREFIX, mh.name);
        let inflated = store
            .get_resource_quota(&root, &root)
            .await?
            .is_some_and(|rq| rq.annotations.contains_key(&marker));
        if !inflated {
            return Ok(None);
        }

        let untouched = match mh.status.step {
            MigrationStep::PreStage => true,
            MigrationStep::AwaitPreStage => store
                .get_update_quota(&Self::move_name(mh, "prestage"))
                .await?
                .is_none_or(|uq| uq.status.phase == TaskPhase::Error && uq.status.applied_edges == 0),
            _ => false,
        };
        if untouched {
            self.deflate_root(mh, &root, allocation).await?;
            return Ok(None);
        }
        Ok(Some(format!(
            "root {} keeps headroom {} recorded in annotation {}",
            root, allocation, marker
        )))
    }

    /// Check the move still makes sense and capture what it carries.
    async fn begin(&self, mh: &mut MigrationHierarchy) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let current = self.namespace(&mh.spec.current_namespace).await?;
        let dest = self.namespace(&mh.spec.to_namespace).await?;
        if current.role() == Some(NamespaceRole::Root) {
            bail!("{} is a cluster root and cannot be migrated", current.name);
        }
        if current.cluster_root() != dest.cluster_root() {
            bail!(
                "{} and {} belong to different hierarchies",
                current.name,
                dest.name
            );
        }
        if dest.name == current.name || is_descendant(&dest, &current.name) {
            bail!("{} cannot be moved under itself", current.name);
        }
        let old_parent = current
            .parent()
            .with_context(|| format!("{} has no parent", current.name))?
            .to_string();
        if old_parent == dest.name {
            bail!("{} is already under {}", current.name, dest.name);
        }
        let sns = store
            .get_subnamespace(&old_parent, &current.name)
            .await?
            .with_context(|| format!("subnamespace {}/{} not found", old_parent, current.name))?;

        let allocation = if holds_quota(&current) {
            sns.hard().clone()
        } else {
            ResourceList::new()
        };
        if !allocation.is_empty() && holds_quota(&dest) {
            let free = free_resources(store, &dest).await?.unwrap_or_default();
            let short = allocation.exceeding(&free);
            if !short.is_empty() {
                bail!(
                    "not enough free quota in {} for {}: needs {}, free {}",
                    dest.name,
                    short.join(", "),
                    allocation,
                    free.restricted_to(&allocation)
                );
            }
        }
        mh.status.old_parent = old_parent;
        mh.status.allocation = ResourceQuotaSpec { hard: allocation };
        Ok(())
    }

    async fn run_step(&self, mh: &MigrationHierarchy) -> anyhow::Result<Progress> {
        let allocation = mh.status.allocation.hard.clone();
        let root = self.cluster_root(mh).await?;
        match mh.status.step {
            MigrationStep::PreStage => {
                if allocation.is_empty() {
                    return Ok(Progress::Advance(MigrationStep::Relocate));
                }
                self.inflate_root(mh, &root, &allocation).await?;
                if mh.spec.to_namespace == root {
                    return Ok(Progress::Advance(MigrationStep::Relocate));
                }
                self.issue_move(mh, "prestage", &root, &mh.spec.to_namespace, &allocation)
                    .await?;
                Ok(Progress::Advance(MigrationStep::AwaitPreStage))
            }
            MigrationStep::AwaitPreStage => {
                if self.await_move(mh, "prestage").await? {
                    Ok(Progress::Advance(MigrationStep::Relocate))
                } else {
                    Ok(Progress::Wait)
                }
            }
            MigrationStep::Relocate => {
                self.relocate(mh, &allocation).await?;
                Ok(Progress::Advance(MigrationStep::Relabel))
            }
            MigrationStep::Relabel => {
                self.relabel(mh).await?;
                Ok(Progress::Advance(MigrationStep::Reclaim))
            }
            MigrationStep::Reclaim => {
                if allocation.is_empty() {
                    return Ok(Progress::Finished);
                }
                if mh.status.old_parent == root {
                    self.deflate_root(mh, &root, &allocation).await?;
                    return Ok(Progress::Finished);
                }
                let old_parent = mh.status.old_parent.clone();
                self.issue_move(mh, "reclaim", &old_parent, &root, &allocation)
                    .await?;
                Ok(Progress::Advance(MigrationStep::AwaitReclaim))
            }
            MigrationStep::AwaitReclaim => {
                if !self.await_move(mh, "reclaim").await? {
                    return Ok(Progress::Wait);
                }
                self.deflate_root(mh, &root, &allocation).await?;
                Ok(Progress::Finished)
            }
        }
    }

    async fn namespace(&self, name: &str) -> anyhow::Result<Namespace> {
        let ns = self
            .ctx
            .store
            .get_namespace(name)
            .await?
            .with_context(|| format!("namespace {} not found", name))?;
        if !ns.is_in_hierarchy() || ns.is_terminating() {
            bail!("namespace {} is not a live hierarchy member", name);
        }
        Ok(ns)
    }

    async fn cluster_root(&self, mh: &MigrationHierarchy) -> anyhow::Result<String> {
        let dest = self.namespace(&mh.spec.to_namespace).await?;
        Ok(dest.cluster_root().to_string())
    }

    /// Grow the root quota by `allocation` once per migration.
    async fn inflate_root(
        &self,
        mh: &MigrationHierarchy,
        root: &str,
        allocation: &ResourceList,
    ) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let mut rq = store
            .get_resource_quota(root, root)
            .await?
            .with_context(|| format!("cluster root {} has no ResourceQuota", root))?;
        let marker = format!("{}{}", ANNOTATION_MIGRATION_HEADROOM_PREFIX, mh.name);
        if rq.annotations.contains_key(&marker) {
            return Ok(());
        }
        rq.spec.hard = rq.spec.hard.plus(allocation);
        rq.annotations.insert(marker, allocation.to_string());
        store.put_resource_quota(&rq).await?;
        info!(
            "MigrationHierarchy {}: root {} inflated by {}",
            mh.name, root, allocation
        );
        Ok(())
    }

    async fn deflate_root(
        &self,
        mh: &MigrationHierarchy,
        root: &str,
        allocation: &ResourceList,
    ) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let Some(mut rq) = store.get_resource_quota(root, root).await? else {
            bail!("cluster root {} has no ResourceQuota", root);
        };
        let marker = format!("{}{}", ANNOTATION_MIGRATION_HEADROOM_PREFIX, mh.name);
        if rq.annotations.remove(&marker).is_none() {
            return Ok(());
        }
        rq.spec.hard = rq.spec.hard.minus(allocation);
        store.put_resource_quota(&rq).await?;
        info!(
            "MigrationHierarchy {}: root {} headroom of {} released",
            mh.name, root, allocation
        );
        Ok(())
    }

    fn move_name(mh: &MigrationHierarchy, stage: &str) -> String {
        format!("{}-{}", mh.name, stage)
    }

    async fn issue_move(
        &self,
        mh: &MigrationHierarchy,
        stage: &str,
        source: &str,
        dest: &str,
        amount: &ResourceList,
    ) -> anyhow::Result<()> {
        let name = Self::move_name(mh, stage);
        if self.ctx.store.get_update_quota(&name).await?.is_none() {
            let uq = UpdateQuota::new(name.as_str(), source, dest, amount.clone());
            self.ctx.store.put_update_quota(&uq).await?;
            debug!(
                "MigrationHierarchy {}: issued {} ({} -> {})",
                mh.name, name, source, dest
            );
        }
        self.ctx.queue.enqueue(ObjectRef::UpdateQuota(name));
        Ok(())
    }

    /// Whether the quota move of `stage` completed. A failed move fails the
    /// migration.
    async fn await_move(&self, mh: &MigrationHierarchy, stage: &str) -> anyhow::Result<bool> {
        let name = Self::move_name(mh, stage);
        let uq = self
            .ctx
            .store
            .get_update_quota(&name)
            .await?
            .with_context(|| format!("quota move {} disappeared", name))?;
        match uq.status.phase {
            TaskPhase::Complete => Ok(true),
            TaskPhase::Error => bail!("quota move {} failed: {}", name, uq.status.reason),
            _ => Ok(false),
        }
    }

    /// Hand the Subnamespace object over to the destination.
    async fn relocate(
        &self,
        mh: &MigrationHierarchy,
        allocation: &ResourceList,
    ) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let name = &mh.spec.current_namespace;
        let dest = &mh.spec.to_namespace;
        let old = store.get_subnamespace(&mh.status.old_parent, name).await?;

        if store.get_subnamespace(dest, name).await?.is_none() {
            let hard = old
                .as_ref()
                .map(|s| s.hard().clone())
                .unwrap_or_else(|| allocation.clone());
            let mut moved = Subnamespace::new(dest.as_str(), name.as_str(), hard);
            if let Some(pool) = old.as_ref().and_then(Subnamespace::requested_pool) {
                moved.set_pool_label(pool);
            }
            moved.status.phase = SubnamespacePhase::Migrated;
            store.put_subnamespace(&moved).await?;
        }
        // the pre-staged quota only covers the declaration captured at the start
        let removed = if allocation.is_empty() {
            store
                .delete_subnamespace(&mh.status.old_parent, name)
                .await
        } else {
            store
                .delete_subnamespace_declaring(&mh.status.old_parent, name, allocation)
                .await
                .map(|_| ())
        };
        if let Err(e) = removed {
            if let Err(cleanup) = store.delete_subnamespace(dest, name).await {
                warn!(
                    "MigrationHierarchy {}: could not remove {}/{}: {}",
                    mh.name, dest, name, cleanup
                );
            }
            return Err(e.context(format!(
                "removing subnamespace {}/{}",
                mh.status.old_parent, name
            )));
        }
        info!(
            "MigrationHierarchy {}: subnamespace {} moved from {} to {}",
            mh.name, name, mh.status.old_parent, dest
        );
        Ok(())
    }

    /// Rewrite hierarchy labels of the subtree, parents first, and re-index it.
    async fn relabel(&self, mh: &MigrationHierarchy) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let dest = self.namespace(&mh.spec.to_namespace).await?;
        let current = store
            .get_namespace(&mh.spec.current_namespace)
            .await?
            .with_context(|| format!("namespace {} not found", mh.spec.current_namespace))?;
        let below = descendants(store, &current.name).await?;

        let mut relabeled: HashMap<String, Namespace> = HashMap::new();
        let mut order = Vec::with_capacity(below.len() + 1);
        for (mut ns, parent) in std::iter::once((current, dest.clone()))
            .map(|(ns, p)| (ns, Some(p)))
            .chain(below.into_iter().map(|ns| (ns, None)))
        {
            let parent = match parent {
                Some(p) => p,
                None => {
                    let parent_name = ns
                        .parent()
                        .with_context(|| format!("{} lost its parent label", ns.name))?
                        .to_string();
                    relabeled
                        .get(&parent_name)
                        .cloned()
                        .with_context(|| format!("parent {} of {} not relabeled", parent_name, ns.name))?
                }
            };
            let pool = ns.is_resource_pool() || parent.is_resource_pool();
            if apply_hierarchy(&mut ns, &parent, pool) {
                store.put_namespace(&ns).await?;
            }
            let want = ns.display_name().to_string();
            let name = ns.name.clone();
            poll_until(
                &format!("labels of {}", name),
                self.ctx.config.poll_attempts,
                self.ctx.config.poll_interval,
                || store.get_namespace(&name),
                |n| n.display_name() == want,
            )
            .await;
            order.push(ns.name.clone());
            relabeled.insert(ns.name.clone(), ns);
        }

        let root_depth = enforcement_root_depth(store, &dest, self.ctx.config.root_depth).await?;
        let moved = &mh.spec.current_namespace;
        let depth = dest.depth() + 1;
        let forest = &self.ctx.forest;
        if depth <= root_depth {
            forest.migrate_hierarchy(moved, "");
            forest.delete_key(moved);
        } else if depth == root_depth + 1 {
            forest.migrate_hierarchy(moved, "");
        } else {
            forest.migrate_hierarchy(moved, &dest.name);
        }
        for name in &order {
            if let Some(ns) = relabeled.get(name) {
                ensure_indexed(forest, ns, root_depth);
            }
        }

        let queue = &self.ctx.queue;
        if let Some(old_parent) = store.get_namespace(&mh.status.old_parent).await?
            && let Some(r) = ObjectRef::subnamespace_of(&old_parent)
        {
            queue.enqueue(r);
        }
        if let Some(r) = ObjectRef::subnamespace_of(&dest) {
            queue.enqueue(r);
        }
        for name in &order {
            if let Some(r) = relabeled.get(name).and_then(ObjectRef::subnamespace_of) {
                queue.enqueue(r);
            }
        }
        info!(
            "MigrationHierarchy {}: relabeled {} namespace(s)",
            mh.name,
            order.len()
        );
        Ok(())
    }
}

#[async_trait]
impl Reconciler for MigrationController {
    fn name(&self) -> &'static str {
        "MigrationController"
    }

    async fn reconcile(&self, target: &ObjectRef) -> anyhow::Result<Action> {
        match target {
            ObjectRef::MigrationHierarchy(name) => self.reconcile_migration(name).await,
            _ => Ok(Action::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_tree_invariant, create, fixture, ns, pods, settle, sns};
    use pkg_types::quota::QuotaAccessor;

    /// org{100} ─ d{10} ─ f{1}
    ///          └ e{5}
    async fn tree() -> (crate::Context, tokio::sync::mpsc::UnboundedReceiver<ObjectRef>) {
        let (ctx, mut rx) = fixture().await;
        create(&ctx, &mut rx, "org", "d", pods("10"), false).await;
        create(&ctx, &mut rx, "org", "e", pods("5"), false).await;
        create(&ctx, &mut rx, "d", "f", pods("1"), false).await;
        (ctx, rx)
    }

    async fn migrate(
        ctx: &crate::Context,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<ObjectRef>,
        current: &str,
        to: &str,
    ) -> MigrationHierarchy {
        let name = format!("move-{}", current);
        ctx.store
            .put_migration(&MigrationHierarchy::new(name.as_str(), current, to))
            .await
            .unwrap();
        settle(ctx, rx, vec![ObjectRef::MigrationHierarchy(name.clone())]).await;
        ctx.store.get_migration(&name).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn leaf_moves_with_its_quota() {
        let (ctx, mut rx) = tree().await;
        let mh = migrate(&ctx, &mut rx, "f", "e").await;
        assert_eq!(mh.status.phase, TaskPhase::Complete, "{}", mh.status.reason);
        assert_eq!(mh.status.old_parent, "d");

        assert!(ctx.store.get_subnamespace("d", "f").await.unwrap().is_none());
        let f = sns(&ctx, "e", "f").await;
        assert_eq!(f.phase(), SubnamespacePhase::Created);
        assert_eq!(f.hard(), &pods("1"));
        assert_eq!(sns(&ctx, "org", "d").await.hard(), &pods("9"));
        assert_eq!(sns(&ctx, "org", "e").await.hard(), &pods("6"));

        let f_ns = ns(&ctx, "f").await;
        assert_eq!(f_ns.parent(), Some("e"));
        assert_eq!(f_ns.display_name(), "org/e/f");
        assert_eq!(ns(&ctx, "d").await.role(), Some(NamespaceRole::Leaf));
        assert_eq!(ns(&ctx, "e").await.role(), Some(NamespaceRole::NoRole));

        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(root.hard(), &pods("100"));
        assert!(root.annotations.is_empty());
        assert_eq!(ctx.forest.key("f"), "f");
        assert_tree_invariant(&ctx).await;
    }

    #[tokio::test]
    async fn subtree_is_relabeled_top_down() {
        let (ctx, mut rx) = tree().await;
        create(&ctx, &mut rx, "e", "g", pods("2"), false).await;
        create(&ctx, &mut rx, "g", "h", pods("1"), false).await;
        assert_eq!(ctx.forest.key("h"), "g");

        let mh = migrate(&ctx, &mut rx, "g", "d").await;
        assert_eq!(mh.status.phase, TaskPhase::Complete, "{}", mh.status.reason);

        let h = ns(&ctx, "h").await;
        assert_eq!(h.display_name(), "org/d/g/h");
        assert_eq!(h.depth(), 3);
        assert_eq!(ns(&ctx, "g").await.parent(), Some("d"));
        assert_eq!(sns(&ctx, "org", "d").await.hard(), &pods("12"));
        assert_eq!(sns(&ctx, "org", "e").await.hard(), &pods("3"));
        assert_eq!(ctx.forest.key("h"), "g");
        assert_tree_invariant(&ctx).await;
    }

    #[tokio::test]
    async fn moving_under_the_root_releases_the_old_parent() {
        let (ctx, mut rx) = tree().await;
        let mh = migrate(&ctx, &mut rx, "f", "org").await;
        assert_eq!(mh.status.phase, TaskPhase::Complete, "{}", mh.status.reason);

        assert_eq!(sns(&ctx, "org", "f").await.hard(), &pods("1"));
        assert_eq!(sns(&ctx, "org", "d").await.hard(), &pods("9"));
        assert_eq!(ns(&ctx, "f").await.depth(), 1);
        // depth 1 enforces locally and leaves the index
        assert_eq!(ctx.forest.key("f"), "");
        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(root.hard(), &pods("100"));
    }

    #[tokio::test]
    async fn full_destination_fails_and_leaves_the_tree_alone() {
        let (ctx, mut rx) = tree().await;
        create(&ctx, &mut rx, "e", "g", pods("5"), false).await;

        let mh = migrate(&ctx, &mut rx, "f", "e").await;
        assert_eq!(mh.status.phase, TaskPhase::Error);
        assert!(mh.status.reason.contains("not enough free quota"), "{}", mh.status.reason);

        assert_eq!(sns(&ctx, "d", "f").await.hard(), &pods("1"));
        assert_eq!(ns(&ctx, "f").await.parent(), Some("d"));
        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(root.hard(), &pods("100"));
    }

    #[tokio::test]
    async fn cannot_move_under_own_subtree() {
        let (ctx, mut rx) = tree().await;
        let mh = migrate(&ctx, &mut rx, "d", "f").await;
        assert_eq!(mh.status.phase, TaskPhase::Error);
        assert_eq!(ns(&ctx, "f").await.parent(), Some("d"));
    }

    /// Declared quotas of d, e and f plus the root quota object.
    async fn snapshot(ctx: &crate::Context) -> Vec<String> {
        let mut out = Vec::new();
        for s in ctx.store.list_all_subnamespaces().await.unwrap() {
            out.push(format!("{}/{}={}", s.namespace, s.name, s.hard()));
        }
        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        out.push(format!("org={} {:?}", root.hard(), root.annotations));
        out.sort();
        out
    }

    #[tokio::test]
    async fn finished_migrations_are_not_replayed() {
        let (ctx, mut rx) = tree().await;
        create(&ctx, &mut rx, "e", "g", pods("4"), false).await;
        let done = migrate(&ctx, &mut rx, "f", "e").await;
        assert_eq!(done.status.phase, TaskPhase::Complete, "{}", done.status.reason);
        let failed = migrate(&ctx, &mut rx, "d", "g").await;
        assert_eq!(failed.status.phase, TaskPhase::Error);

        let before = snapshot(&ctx).await;
        let controller = MigrationController::new(ctx.clone());
        for name in ["move-f", "move-d"] {
            let action = controller
                .reconcile(&ObjectRef::MigrationHierarchy(name.to_string()))
                .await
                .unwrap();
            assert_eq!(action, Action::Done);
        }
        settle(&ctx, &mut rx, vec![ObjectRef::MigrationHierarchy("move-f".to_string())]).await;
        assert_eq!(snapshot(&ctx).await, before);
        assert_eq!(
            ctx.store.get_migration("move-f").await.unwrap().unwrap().status.phase,
            TaskPhase::Complete
        );
        assert!(ctx.store.get_update_quota("move-f-reclaim").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn restart_while_waiting_on_the_prestage_move() {
        let (ctx, mut rx) = tree().await;
        ctx.store
            .put_migration(&MigrationHierarchy::new("move-f", "f", "e"))
            .await
            .unwrap();
        let target = ObjectRef::MigrationHierarchy("move-f".to_string());
        let action = MigrationController::new(ctx.clone())
            .reconcile(&target)
            .await
            .unwrap();
        assert!(matches!(action, Action::Requeue(_)));
        let mh = ctx.store.get_migration("move-f").await.unwrap().unwrap();
        assert_eq!(mh.status.step, MigrationStep::AwaitPreStage);

        // a new process: fresh index over the same store
        let restarted = crate::Context {
            forest: std::sync::Arc::new(pkg_forest::NamespaceForest::new()),
            ..ctx.clone()
        };
        pkg_forest::rebuild(&restarted.forest, &restarted.store, restarted.config.root_depth)
            .await
            .unwrap();
        settle(&restarted, &mut rx, vec![target]).await;

        let mh = ctx.store.get_migration("move-f").await.unwrap().unwrap();
        assert_eq!(mh.status.phase, TaskPhase::Complete, "{}", mh.status.reason);
        assert_eq!(sns(&ctx, "e", "f").await.hard(), &pods("1"));
        assert_eq!(sns(&ctx, "org", "d").await.hard(), &pods("9"));
        assert_eq!(sns(&ctx, "org", "e").await.hard(), &pods("6"));
        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(root.hard(), &pods("100"));
        assert!(root.annotations.is_empty());
        assert_eq!(restarted.forest.key("f"), "f");
        assert_tree_invariant(&restarted).await;
    }

    #[tokio::test]
    async fn resuming_at_relabel_moves_no_quota_twice() {
        let (ctx, mut rx) = tree().await;
        let mut mh = migrate(&ctx, &mut rx, "f", "e").await;
        assert_eq!(mh.status.phase, TaskPhase::Complete, "{}", mh.status.reason);
        let after = snapshot(&ctx).await;

        // as if the process died before the Relabel step was recorded
        mh.status.phase = TaskPhase::InProgress;
        mh.status.step = MigrationStep::Relabel;
        ctx.store.put_migration(&mh).await.unwrap();
        settle(&ctx, &mut rx, vec![ObjectRef::MigrationHierarchy("move-f".to_string())]).await;

        let mh = ctx.store.get_migration("move-f").await.unwrap().unwrap();
        assert_eq!(mh.status.phase, TaskPhase::Complete, "{}", mh.status.reason);
        assert_eq!(snapshot(&ctx).await, after);
        assert_eq!(ns(&ctx, "f").await.display_name(), "org/e/f");
        assert_tree_invariant(&ctx).await;
    }

    #[tokio::test]
    async fn changed_source_rolls_the_copy_back() {
        let (ctx, mut rx) = tree().await;
        ctx.store
            .put_migration(&MigrationHierarchy::new("move-f", "f", "e"))
            .await
            .unwrap();
        let target = ObjectRef::MigrationHierarchy("move-f".to_string());
        MigrationController::new(ctx.clone())
            .reconcile(&target)
            .await
            .unwrap();

        // the declaration grows after the headroom was staged for 1
        let mut f = sns(&ctx, "d", "f").await;
        f.set_hard(pods("2"));
        ctx.store.put_subnamespace(&f).await.unwrap();
        settle(&ctx, &mut rx, vec![target]).await;

        let mh = ctx.store.get_migration("move-f").await.unwrap().unwrap();
        assert_eq!(mh.status.phase, TaskPhase::Error);
        assert_eq!(mh.status.step, MigrationStep::Relocate);
        assert!(mh.status.reason.contains("removing subnamespace d/f"), "{}", mh.status.reason);
        assert!(mh.status.reason.contains("keeps headroom"), "{}", mh.status.reason);

        assert!(ctx.store.get_subnamespace("e", "f").await.unwrap().is_none());
        assert_eq!(sns(&ctx, "d", "f").await.hard(), &pods("2"));
        assert_eq!(ns(&ctx, "f").await.parent(), Some("d"));
        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(root.hard(), &pods("101"));
        assert!(root
            .annotations
            .contains_key(&format!("{}move-f", ANNOTATION_MIGRATION_HEADROOM_PREFIX)));
    }

    #[tokio::test]
    async fn failed_prestage_gives_the_headroom_back() {
        let (ctx, mut rx) = tree().await;
        let mut stuck = UpdateQuota::new("move-f-prestage", "org", "e", pods("1"));
        stuck.status.phase = TaskPhase::Error;
        stuck.status.reason = "subnamespace org/e not found".to_string();
        ctx.store.put_update_quota(&stuck).await.unwrap();

        let mh = migrate(&ctx, &mut rx, "f", "e").await;
        assert_eq!(mh.status.phase, TaskPhase::Error);
        assert!(mh.status.reason.contains("move-f-prestage failed"), "{}", mh.status.reason);
        assert!(!mh.status.reason.contains("headroom"), "{}", mh.status.reason);

        let root = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(root.hard(), &pods("100"));
        assert!(root.annotations.is_empty());
        assert_eq!(sns(&ctx, "d", "f").await.hard(), &pods("1"));
        assert_eq!(sns(&ctx, "org", "e").await.hard(), &pods("5"));
    }

    #[tokio::test]
    async fn headroom_is_added_once() {
        let (ctx, _rx) = tree().await;
        let controller = MigrationController::new(ctx.clone());
        let mh = MigrationHierarchy::new("m", "f", "e");
        controller.inflate_root(&mh, "org", &pods("1")).await.unwrap();
        controller.inflate_root(&mh, "org", &pods("1")).await.unwrap();
        let rq = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(rq.hard(), &pods("101"));

        controller.deflate_root(&mh, "org", &pods("1")).await.unwrap();
        controller.deflate_root(&mh, "org", &pods("1")).await.unwrap();
        let rq = ctx.store.get_resource_quota("org", "org").await.unwrap().unwrap();
        assert_eq!(rq.hard(), &pods("100"));
    }
}
