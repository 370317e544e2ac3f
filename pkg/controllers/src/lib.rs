//! Reconcilers for the namespace hierarchy and the dispatcher that drives them.

pub mod labels;
pub mod migration;
pub mod namespace;
pub mod queue;
pub mod quota;
pub mod retry;
pub mod subnamespace;
pub mod updatequota;

#[cfg(test)]
mod test_support;

use async_trait::async_trait;
use pkg_constants::state::{
    MIGRATION_HIERARCHIES_PREFIX, NAMESPACES_PREFIX, SUBNAMESPACES_PREFIX, UPDATE_QUOTAS_PREFIX,
};
use pkg_forest::NamespaceForest;
use pkg_state::client::StateStore;
use pkg_types::config::HnsConfig;
use pkg_types::namespace::Namespace;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::WorkQueue;

/// Handles shared by every reconciler.
#[derive(Clone)]
pub struct Context {
    pub store: StateStore,
    pub forest: Arc<NamespaceForest>,
    pub queue: WorkQueue,
    pub config: Arc<HnsConfig>,
}

/// Object a reconciliation is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Namespace(String),
    /// `namespace` is the parent the Subnamespace is stored in.
    Subnamespace { namespace: String, name: String },
    MigrationHierarchy(String),
    UpdateQuota(String),
}

impl ObjectRef {
    pub fn subnamespace(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectRef::Subnamespace {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The Subnamespace describing `ns`, when it has a parent.
    pub fn subnamespace_of(ns: &Namespace) -> Option<Self> {
        ns.parent().map(|p| Self::subnamespace(p, &ns.name))
    }

    /// Map a store key to the object it belongs to. Keys of kinds nobody
    /// reconciles map to `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        if let Some(name) = key.strip_prefix(NAMESPACES_PREFIX) {
            return non_empty(name).map(|n| ObjectRef::Namespace(n.to_string()));
        }
        if let Some(rest) = key.strip_prefix(SUBNAMESPACES_PREFIX) {
            let (namespace, name) = rest.split_once('/')?;
            if namespace.is_empty() || name.is_empty() {
                return None;
            }
            return Some(Self::subnamespace(namespace, name));
        }
        if let Some(name) = key.strip_prefix(MIGRATION_HIERARCHIES_PREFIX) {
            return non_empty(name).map(|n| ObjectRef::MigrationHierarchy(n.to_string()));
        }
        if let Some(name) = key.strip_prefix(UPDATE_QUOTAS_PREFIX) {
            return non_empty(name).map(|n| ObjectRef::UpdateQuota(n.to_string()));
        }
        None
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectRef::Namespace(n) => write!(f, "Namespace/{}", n),
            ObjectRef::Subnamespace { namespace, name } => {
                write!(f, "Subnamespace/{}/{}", namespace, name)
            }
            ObjectRef::MigrationHierarchy(n) => write!(f, "MigrationHierarchy/{}", n),
            ObjectRef::UpdateQuota(n) => write!(f, "UpdateQuota/{}", n),
        }
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    Requeue(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn reconcile(&self, target: &ObjectRef) -> anyhow::Result<Action>;
}

/// One reconciler per object kind.
#[derive(Clone)]
pub struct Controllers {
    namespace: Arc<dyn Reconciler>,
    subnamespace: Arc<dyn Reconciler>,
    migration: Arc<dyn Reconciler>,
    update_quota: Arc<dyn Reconciler>,
}

impl Controllers {
    pub fn new(ctx: &Context) -> Self {
        Self {
            namespace: Arc::new(namespace::NamespaceController::new(ctx.clone())),
            subnamespace: Arc::new(subnamespace::SubnamespaceController::new(ctx.clone())),
            migration: Arc::new(migration::MigrationController::new(ctx.clone())),
            update_quota: Arc::new(updatequota::UpdateQuotaController::new(ctx.clone())),
        }
    }

    pub fn route(&self, target: &ObjectRef) -> &Arc<dyn Reconciler> {
        match target {
            ObjectRef::Namespace(_) => &self.namespace,
            ObjectRef::Subnamespace { .. } => &self.subnamespace,
            ObjectRef::MigrationHierarchy(_) => &self.migration,
            ObjectRef::UpdateQuota(_) => &self.update_quota,
        }
    }

    pub async fn dispatch(&self, target: &ObjectRef) -> anyhow::Result<Action> {
        self.route(target).reconcile(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_object_refs() {
        assert_eq!(
            ObjectRef::from_key("/registry/namespaces/team-a"),
            Some(ObjectRef::Namespace("team-a".to_string()))
        );
        assert_eq!(
            ObjectRef::from_key("/registry/subnamespaces/org/team-a"),
            Some(ObjectRef::subnamespace("org", "team-a"))
        );
        assert_eq!(
            ObjectRef::from_key("/registry/migrationhierarchies/m1"),
            Some(ObjectRef::MigrationHierarchy("m1".to_string()))
        );
        assert_eq!(
            ObjectRef::from_key("/registry/updatequotas/u1"),
            Some(ObjectRef::UpdateQuota("u1".to_string()))
        );
        assert_eq!(ObjectRef::from_key("/registry/resourcequotas/org/org"), None);
        assert_eq!(ObjectRef::from_key("/registry/subnamespaces/org"), None);
        assert_eq!(ObjectRef::from_key("/registry/namespaces/"), None);
    }
}
