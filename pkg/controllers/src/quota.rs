//! Enforcing quota objects of a namespace: a namespace-local ResourceQuota or
//! a ClusterResourceQuota selected by the namespace's selector annotation.
//! Both are named after the namespace they enforce.

use pkg_state::client::StateStore;
use pkg_types::namespace::{Namespace, selector_annotation};
use pkg_types::quota::{
    ClusterResourceQuota, QuotaAccessor, QuotaKind, QuotaObject, QuotaSelector, ResourceQuota,
};
use pkg_types::resources::ResourceList;
use std::collections::BTreeMap;
use tracing::info;

/// Selector matching `ns` and every namespace below it.
pub fn selector_for(ns: &Namespace) -> QuotaSelector {
    QuotaSelector {
        annotations: BTreeMap::from([(selector_annotation(ns.depth()), ns.name.clone())]),
    }
}

/// The quota object enforcing `name`, namespace-local first.
pub async fn get_quota(store: &StateStore, name: &str) -> anyhow::Result<Option<QuotaObject>> {
    if let Some(rq) = store.get_resource_quota(name, name).await? {
        return Ok(Some(QuotaObject::NamespaceLocal(rq)));
    }
    Ok(store
        .get_cluster_resource_quota(name)
        .await?
        .map(QuotaObject::ClusterWide))
}

/// Make `ns` enforced by exactly one object of `kind` whose hard limits are
/// `hard`. The object of the other kind is removed. Returns whether anything
/// was written.
pub async fn ensure_quota(
    store: &StateStore,
    ns: &Namespace,
    kind: QuotaKind,
    hard: &ResourceList,
) -> anyhow::Result<bool> {
    let mut changed = false;
    let name = &ns.name;
    match kind {
        QuotaKind::NamespaceLocal => {
            if store.get_cluster_resource_quota(name).await?.is_some() {
                store.delete_cluster_resource_quota(name).await?;
                info!("Quota {}: ClusterResourceQuota replaced by ResourceQuota", name);
                changed = true;
            }
            match store.get_resource_quota(name, name).await? {
                Some(mut rq) if rq.hard() != hard => {
                    rq.set_hard(hard.clone());
                    store.put_resource_quota(&rq).await?;
                    changed = true;
                }
                Some(_) => {}
                None => {
                    store
                        .put_resource_quota(&ResourceQuota::new(name.as_str(), name.as_str(), hard.clone()))
                        .await?;
                    info!("Quota {}: created ResourceQuota {}", name, hard);
                    changed = true;
                }
            }
        }
        QuotaKind::ClusterWide => {
            if store.get_resource_quota(name, name).await?.is_some() {
                store.delete_resource_quota(name, name).await?;
                info!("Quota {}: ResourceQuota replaced by ClusterResourceQuota", name);
                changed = true;
            }
            let selector = selector_for(ns);
            match store.get_cluster_resource_quota(name).await? {
                Some(mut crq) if crq.hard() != hard || crq.spec.selector != selector => {
                    crq.set_hard(hard.clone());
                    crq.spec.selector = selector;
                    store.put_cluster_resource_quota(&crq).await?;
                    changed = true;
                }
                Some(_) => {}
                None => {
                    store
                        .put_cluster_resource_quota(&ClusterResourceQuota::new(
                            name.as_str(),
                            selector,
                            hard.clone(),
                        ))
                        .await?;
                    info!("Quota {}: created ClusterResourceQuota {}", name, hard);
                    changed = true;
                }
            }
        }
    }
    Ok(changed)
}

/// Remove every quota object enforcing `name`. Returns whether one existed.
pub async fn delete_quotas(store: &StateStore, name: &str) -> anyhow::Result<bool> {
    let mut removed = false;
    if store.get_resource_quota(name, name).await?.is_some() {
        store.delete_resource_quota(name, name).await?;
        removed = true;
    }
    if store.get_cluster_resource_quota(name).await?.is_some() {
        store.delete_cluster_resource_quota(name).await?;
        removed = true;
    }
    Ok(removed)
}
