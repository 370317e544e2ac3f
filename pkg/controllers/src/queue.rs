use pkg_constants::controller::RESYNC_INTERVAL_SECS;
use pkg_constants::state::REGISTRY_PREFIX;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::{Action, Context, Controllers, ObjectRef};

/// Unbounded queue of objects waiting for reconciliation. Posting never blocks.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<ObjectRef>,
}

impl WorkQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObjectRef>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, target: ObjectRef) {
        debug!("enqueue {}", target);
        if self.tx.send(target).is_err() {
            debug!("work queue closed, dropping reference");
        }
    }

    pub fn enqueue_after(&self, target: ObjectRef, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(target);
        });
    }
}

#[derive(Default)]
struct InFlight {
    running: HashSet<ObjectRef>,
    /// Keys that changed while their reconciliation was running.
    dirty: HashSet<ObjectRef>,
}

/// Feeds watch events and synthetic references to the reconcilers, one
/// reconciliation per key at a time.
pub struct Manager {
    ctx: Context,
    rx: mpsc::UnboundedReceiver<ObjectRef>,
    controllers: Controllers,
    in_flight: Arc<Mutex<InFlight>>,
}

impl Manager {
    pub fn new(ctx: Context, rx: mpsc::UnboundedReceiver<ObjectRef>) -> Self {
        let controllers = Controllers::new(&ctx);
        Self {
            ctx,
            rx,
            controllers,
            in_flight: Arc::new(Mutex::new(InFlight::default())),
        }
    }

    pub fn start(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "HierarchyManager started (resync={}s, root-depth={}, max-subnamespaces={})",
                RESYNC_INTERVAL_SECS, self.ctx.config.root_depth, self.ctx.config.max_subnamespaces
            );
            self.spawn_watch();
            self.spawn_resync();
            while let Some(target) = self.rx.recv().await {
                self.dispatch(target);
            }
            info!("HierarchyManager stopped: work queue closed");
        })
    }

    fn spawn_watch(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut stream = BroadcastStream::new(ctx.store.event_log.subscribe());
            let mut last_seq = ctx.store.event_log.current_seq().await;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) => {
                        last_seq = last_seq.max(event.seq);
                        if let Some(target) = ObjectRef::from_key(&event.key) {
                            ctx.queue.enqueue(target);
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => match replay(&ctx, last_seq).await {
                        Some(seq) => {
                            debug!("Watch lagged by {} events, replayed up to {}", n, seq);
                            last_seq = seq;
                        }
                        None => {
                            warn!("Watch lagged by {} events past the replay buffer, resyncing", n);
                            if let Err(e) = resync(&ctx).await {
                                warn!("Resync after lag failed: {}", e);
                            }
                        }
                    },
                }
            }
        });
    }

    fn spawn_resync(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(RESYNC_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = resync(&ctx).await {
                    warn!("Resync failed: {}", e);
                }
            }
        });
    }

    fn dispatch(&self, target: ObjectRef) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.running.contains(&target) {
                in_flight.dirty.insert(target);
                return;
            }
            in_flight.running.insert(target.clone());
        }

        let controllers = self.controllers.clone();
        let in_flight = self.in_flight.clone();
        let queue = self.ctx.queue.clone();
        let retry_after = self.ctx.config.requeue_interval;
        tokio::spawn(async move {
            loop {
                let reconciler = controllers.route(&target);
                match reconciler.reconcile(&target).await {
                    Ok(Action::Done) => {}
                    Ok(Action::Requeue(delay)) => queue.enqueue_after(target.clone(), delay),
                    Err(e) => {
                        warn!("{} reconcile error for {}: {}", reconciler.name(), target, e);
                        queue.enqueue_after(target.clone(), retry_after);
                    }
                }
                let finished = {
                    let mut guard = in_flight.lock().unwrap_or_else(|e| e.into_inner());
                    let again = guard.dirty.remove(&target);
                    if !again {
                        guard.running.remove(&target);
                    }
                    !again
                };
                if finished {
                    break;
                }
            }
        });
    }
}

/// Enqueue every hierarchy object the store holds.
/// Enqueue the objects of every event recorded after `from_seq`. Returns the
/// newest sequence number replayed, or `None` when the log no longer reaches
/// back that far.
async fn replay(ctx: &Context, from_seq: u64) -> Option<u64> {
    let events = ctx
        .store
        .event_log
        .events_since(from_seq, REGISTRY_PREFIX)
        .await?;
    let mut last = from_seq;
    for event in events {
        last = event.seq;
        if let Some(target) = ObjectRef::from_key(&event.key) {
            ctx.queue.enqueue(target);
        }
    }
    Some(last)
}

async fn resync(ctx: &Context) -> anyhow::Result<()> {
    let namespaces = ctx.store.list_namespaces().await?;
    let subnamespaces = ctx.store.list_all_subnamespaces().await?;
    let migrations = ctx.store.list_migrations().await?;
    let update_quotas = ctx.store.list_update_quotas().await?;
    debug!(
        "Resync: {} namespaces, {} subnamespaces, {} migrations, {} quota moves",
        namespaces.len(),
        subnamespaces.len(),
        migrations.len(),
        update_quotas.len()
    );

    for ns in namespaces.into_iter().filter(|n| n.is_in_hierarchy()) {
        ctx.queue.enqueue(ObjectRef::Namespace(ns.name));
    }
    for sns in subnamespaces {
        ctx.queue
            .enqueue(ObjectRef::subnamespace(sns.namespace, sns.name));
    }
    for mh in migrations.into_iter().filter(|m| !m.status.phase.is_terminal()) {
        ctx.queue.enqueue(ObjectRef::MigrationHierarchy(mh.name));
    }
    for uq in update_quotas
        .into_iter()
        .filter(|u| !u.status.phase.is_terminal())
    {
        ctx.queue.enqueue(ObjectRef::UpdateQuota(uq.name));
    }
    Ok(())
}
