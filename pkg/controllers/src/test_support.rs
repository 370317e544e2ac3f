//! Fixtures shared by the controller tests.

use pkg_forest::NamespaceForest;
use pkg_state::client::StateStore;
use pkg_types::config::HnsConfig;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;
use pkg_types::resources::ResourceList;
use pkg_types::subnamespace::Subnamespace;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::queue::WorkQueue;
use crate::{Action, Context, Controllers, ObjectRef};

pub fn pods(n: &str) -> ResourceList {
    ResourceList::parse(&[("pods", n)]).unwrap()
}

pub fn test_config() -> HnsConfig {
    HnsConfig {
        poll_attempts: 1,
        poll_interval: Duration::from_millis(1),
        requeue_interval: Duration::from_millis(1),
        ..HnsConfig::default()
    }
}

/// Context over an in-memory store holding the cluster root `org{pods: 100}`.
pub async fn fixture() -> (Context, UnboundedReceiver<ObjectRef>) {
    fixture_with(test_config()).await
}

pub async fn fixture_with(config: HnsConfig) -> (Context, UnboundedReceiver<ObjectRef>) {
    let store = StateStore::in_memory().await.unwrap();
    store.put_namespace(&Namespace::new_root("org")).await.unwrap();
    store
        .put_resource_quota(&ResourceQuota::new("org", "org", pods("100")))
        .await
        .unwrap();
    let (queue, rx) = WorkQueue::new();
    let ctx = Context {
        store,
        forest: Arc::new(NamespaceForest::new()),
        queue,
        config: Arc::new(config),
    };
    (ctx, rx)
}

/// Reconcile `first` and everything it enqueues until nothing is left.
pub async fn settle(
    ctx: &Context,
    rx: &mut UnboundedReceiver<ObjectRef>,
    first: Vec<ObjectRef>,
) {
    let controllers = Controllers::new(ctx);
    let mut work: VecDeque<ObjectRef> = first.into();
    for _ in 0..1000 {
        while let Ok(target) = rx.try_recv() {
            if !work.contains(&target) {
                work.push_back(target);
            }
        }
        let Some(target) = work.pop_front() else {
            return;
        };
        match controllers.dispatch(&target).await.unwrap() {
            Action::Done => {}
            Action::Requeue(_) => work.push_back(target),
        }
    }
    panic!("reconciliation did not settle");
}

/// Request `parent/name` and reconcile it to completion.
pub async fn create(
    ctx: &Context,
    rx: &mut UnboundedReceiver<ObjectRef>,
    parent: &str,
    name: &str,
    hard: ResourceList,
    pool: bool,
) {
    let mut sns = Subnamespace::new(parent, name, hard);
    sns.set_pool_label(pool);
    ctx.store.put_subnamespace(&sns).await.unwrap();
    settle(ctx, rx, vec![ObjectRef::subnamespace(parent, name)]).await;
}

pub async fn sns(ctx: &Context, parent: &str, name: &str) -> Subnamespace {
    ctx.store
        .get_subnamespace(parent, name)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("subnamespace {}/{} missing", parent, name))
}

pub async fn ns(ctx: &Context, name: &str) -> Namespace {
    ctx.store
        .get_namespace(name)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("namespace {} missing", name))
}

/// Every subnamespace declares at least what its children hold.
pub async fn assert_tree_invariant(ctx: &Context) {
    for sns in ctx.store.list_all_subnamespaces().await.unwrap() {
        let children = ctx.store.list_subnamespaces(&sns.name).await.unwrap();
        if children.is_empty() || sns.hard().is_empty() {
            continue;
        }
        let held = pkg_state::hierarchy::allocated(&children);
        assert!(
            held.fits_within(sns.hard()),
            "{} declares {} but its children hold {}",
            sns.name,
            sns.hard(),
            held
        );
    }
}
