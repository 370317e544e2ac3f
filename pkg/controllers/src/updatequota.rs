use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use pkg_state::error::is_conflict;
use pkg_state::hierarchy::holds_quota;
use pkg_types::quota::QuotaAccessor;
use pkg_types::resources::ResourceList;
use pkg_types::task::{TaskPhase, UpdateQuota};
use tracing::{debug, info, warn};

use crate::quota::get_quota;
use crate::retry::poll_until;
use crate::{Action, Context, ObjectRef, Reconciler};

/// Attempts per edge when another writer keeps winning the Subnamespace.
const CONFLICT_RETRIES: u32 = 5;

/// One parent → child link whose declared quota is adjusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub parent: String,
    pub child: String,
    /// Add the amount to the child when true, subtract it otherwise.
    pub grow: bool,
}

/// Edges walked to move quota from the end of `source` to the end of `dest`,
/// both display-paths from the same cluster root.
///
/// Subtractions run upward from the source to just below the lowest common
/// ancestor, additions downward from there to the destination. Each step
/// then stays within what the parent can give.
pub fn plan(source: &[String], dest: &[String]) -> anyhow::Result<Vec<Edge>> {
    let (si, common) = source
        .iter()
        .enumerate()
        .rev()
        .find(|(_, name)| dest.contains(name))
        .ok_or_else(|| anyhow!("{:?} and {:?} share no ancestor", source, dest))?;
    let di = dest
        .iter()
        .position(|name| name == common)
        .ok_or_else(|| anyhow!("{} not found in {:?}", common, dest))?;

    let mut edges = Vec::new();
    for i in (si + 1..source.len()).rev() {
        edges.push(Edge {
            parent: source[i - 1].clone(),
            child: source[i].clone(),
            grow: false,
        });
    }
    for i in di + 1..dest.len() {
        edges.push(Edge {
            parent: dest[i - 1].clone(),
            child: dest[i].clone(),
            grow: true,
        });
    }
    Ok(edges)
}

/// Moves declared quota between two namespaces of one hierarchy, one
/// Subnamespace at a time. Progress is persisted after each edge so an
/// interrupted move resumes where it stopped.
pub struct UpdateQuotaController {
    ctx: Context,
}

impl UpdateQuotaController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn reconcile_update_quota(&self, name: &str) -> anyhow::Result<Action> {
        let store = &self.ctx.store;
        let Some(mut uq) = store.get_update_quota(name).await? else {
            return Ok(Action::Done);
        };
        if uq.status.phase.is_terminal() {
            return Ok(Action::Done);
        }
        if uq.status.phase == TaskPhase::None {
            uq.status.phase = TaskPhase::InProgress;
            uq.status.applied_edges = 0;
            store.put_update_quota(&uq).await?;
            info!(
                "UpdateQuota {}: moving {} from {} to {}",
                uq.name,
                uq.spec.resource_quota.hard,
                uq.spec.source_namespace,
                uq.spec.dest_namespace
            );
        }

        match self.apply(&mut uq).await {
            Ok(()) => {
                uq.status.phase = TaskPhase::Complete;
                uq.status.reason.clear();
                info!("UpdateQuota {}: complete", uq.name);
            }
            Err(e) => {
                uq.status.phase = TaskPhase::Error;
                uq.status.reason = format!("{:#}", e);
                warn!("UpdateQuota {}: {:#}", uq.name, e);
            }
        }
        store.put_update_quota(&uq).await?;
        Ok(Action::Done)
    }

    async fn apply(&self, uq: &mut UpdateQuota) -> anyhow::Result<()> {
        let store = &self.ctx.store;
        let source = store
            .get_namespace(&uq.spec.source_namespace)
            .await?
            .with_context(|| format!("namespace {} not found", uq.spec.source_namespace))?;
        let dest = store
            .get_namespace(&uq.spec.dest_namespace)
            .await?
            .with_context(|| format!("namespace {} not found", uq.spec.dest_namespace))?;
        if source.cluster_root() != dest.cluster_root() {
            bail!(
                "{} and {} belong to different hierarchies",
                source.name,
                dest.name
            );
        }

        let amount = &uq.spec.resource_quota.hard;
        let edges = plan(&source.display_path(), &dest.display_path())?;
        for (i, edge) in edges.iter().enumerate() {
            if (i as u32) < uq.status.applied_edges {
                continue;
            }
            self.apply_edge(edge, amount).await?;
            uq.status.applied_edges = i as u32 + 1;
            store.put_update_quota(uq).await?;
        }
        Ok(())
    }

    async fn apply_edge(&self, edge: &Edge, amount: &ResourceList) -> anyhow::Result<()> {
        let mut attempt = 1;
        let written = loop {
            match self.write_edge(edge, amount).await {
                Ok(written) => break written,
                Err(e) if is_conflict(&e) && attempt < CONFLICT_RETRIES => {
                    debug!("{}/{}: {:#}, retrying", edge.parent, edge.child, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };
        let Some(new_hard) = written else {
            return Ok(());
        };

        let store = &self.ctx.store;
        self.ctx
            .queue
            .enqueue(ObjectRef::subnamespace(&edge.parent, &edge.child));
        // the parent's allocation totals change with it
        if let Some(parent) = store.get_namespace(&edge.parent).await?
            && let Some(parent_ref) = ObjectRef::subnamespace_of(&parent)
        {
            self.ctx.queue.enqueue(parent_ref);
        }

        let name = edge.child.clone();
        poll_until(
            &format!("quota of {}", name),
            self.ctx.config.poll_attempts,
            self.ctx.config.poll_interval,
            || get_quota(store, &name),
            |q| q.hard().same_amounts(&new_hard),
        )
        .await;
        Ok(())
    }

    /// Read, check and write one edge. `None` when the child keeps no quota
    /// of its own.
    async fn write_edge(
        &self,
        edge: &Edge,
        amount: &ResourceList,
    ) -> anyhow::Result<Option<ResourceList>> {
        let store = &self.ctx.store;
        let mut sns = store
            .get_subnamespace(&edge.parent, &edge.child)
            .await?
            .with_context(|| format!("subnamespace {}/{} not found", edge.parent, edge.child))?;
        if let Some(ns) = store.get_namespace(&edge.child).await?
            && !holds_quota(&ns)
        {
            debug!("{} shares its pool's quota, skipped", edge.child);
            return Ok(None);
        }

        let new_hard = if edge.grow {
            sns.hard().plus(amount)
        } else {
            sns.hard().minus(amount)
        };
        let verdict = pkg_admission::check_quota_change(store, &sns, &new_hard).await?;
        if !verdict.allowed {
            bail!(verdict.reason);
        }
        debug!(
            "{}/{}: {} -> {}",
            edge.parent,
            edge.child,
            sns.hard(),
            new_hard
        );
        sns.set_hard(new_hard.clone());
        store.put_subnamespace(&sns).await?;
        Ok(Some(new_hard))
    }
}

#[async_trait]
impl Reconciler for UpdateQuotaController {
    fn name(&self) -> &'static str {
        "UpdateQuotaController"
    }

    async fn reconcile(&self, target: &ObjectRef) -> anyhow::Result<Action> {
        match target {
            ObjectRef::UpdateQuota(name) => self.reconcile_update_quota(name).await,
            _ => Ok(Action::Done),
        }
    }
}
