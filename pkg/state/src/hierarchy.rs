//! Read-side queries over the namespace tree as it is persisted in the store.

use pkg_types::namespace::{Namespace, NamespaceRole};
use pkg_types::resources::ResourceList;
use pkg_types::subnamespace::Subnamespace;
use std::collections::VecDeque;

use crate::client::StateStore;

/// Whether a namespace at `depth` enforces through a namespace-local quota.
/// Resource pools always aggregate through a cluster-wide quota.
pub fn uses_local_quota(depth: u32, root_depth: u32, resource_pool: bool) -> bool {
    depth <= root_depth && !resource_pool
}

/// Whether `ns` has an enforcing quota object of its own. Pool members below
/// the topmost pooled namespace share their ancestor's.
pub fn holds_quota(ns: &Namespace) -> bool {
    !ns.is_resource_pool() || ns.is_upper_resource_pool()
}

/// True when `ancestor` appears above `candidate` in its display-path.
pub fn is_descendant(candidate: &Namespace, ancestor: &str) -> bool {
    let path = candidate.display_path();
    path.len() > 1 && path[..path.len() - 1].iter().any(|p| p == ancestor)
}

/// Sum of the quota declared by `children`.
pub fn allocated(children: &[Subnamespace]) -> ResourceList {
    children.iter().map(|c| c.hard()).sum()
}

/// The Subnamespace object describing `ns`, stored in its parent.
pub async fn subnamespace_of(
    store: &StateStore,
    ns: &Namespace,
) -> anyhow::Result<Option<Subnamespace>> {
    match ns.parent() {
        Some(parent) => store.get_subnamespace(parent, &ns.name).await,
        None => Ok(None),
    }
}

/// Quota declared for `ns`: its Subnamespace spec, or the ResourceQuota of a cluster root.
pub async fn declared_quota(
    store: &StateStore,
    ns: &Namespace,
) -> anyhow::Result<Option<ResourceList>> {
    if ns.role() == Some(NamespaceRole::Root) {
        let rq = store.get_resource_quota(&ns.name, &ns.name).await?;
        return Ok(rq.map(|q| q.spec.hard));
    }
    Ok(subnamespace_of(store, ns).await?.map(|s| s.hard().clone()))
}

/// Declared quota minus what the children of `ns` have been given.
pub async fn free_resources(
    store: &StateStore,
    ns: &Namespace,
) -> anyhow::Result<Option<ResourceList>> {
    let Some(declared) = declared_quota(store, ns).await? else {
        return Ok(None);
    };
    let children = store.list_subnamespaces(&ns.name).await?;
    Ok(Some(declared.minus(&allocated(&children))))
}

/// Enforcement-root depth for the hierarchy `ns` belongs to.
pub async fn enforcement_root_depth(
    store: &StateStore,
    ns: &Namespace,
    default: u32,
) -> anyhow::Result<u32> {
    if ns.role() == Some(NamespaceRole::Root) {
        return Ok(ns.rq_depth_override().unwrap_or(default));
    }
    let root = store.get_namespace(ns.cluster_root()).await?;
    Ok(root
        .and_then(|r| r.rq_depth_override())
        .unwrap_or(default))
}

/// Every namespace below `name`, parents before children.
pub async fn descendants(store: &StateStore, name: &str) -> anyhow::Result<Vec<Namespace>> {
    let mut out = Vec::new();
    let mut work = VecDeque::from([name.to_string()]);
    while let Some(current) = work.pop_front() {
        for child in store.list_subnamespaces(&current).await? {
            if let Some(ns) = store.get_namespace(&child.name).await? {
                work.push_back(ns.name.clone());
                out.push(ns);
            }
        }
    }
    Ok(out)
}
