use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resources::ResourceList;

/// Declared limits and observed usage of a quota.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    #[serde(default)]
    pub hard: ResourceList,
    /// Filled in by the platform's quota accounting.
    #[serde(default)]
    pub used: ResourceList,
}

// --- ResourceQuota (namespace-local) ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuotaObjectSpec {
    #[serde(default)]
    pub hard: ResourceList,
}

/// Quota enforced on a single namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: ResourceQuotaObjectSpec,
    #[serde(default)]
    pub status: QuotaStatus,
    pub created_at: DateTime<Utc>,
}

impl ResourceQuota {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, hard: ResourceList) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            spec: ResourceQuotaObjectSpec { hard },
            status: QuotaStatus::default(),
            created_at: Utc::now(),
        }
    }
}

// --- ClusterResourceQuota (aggregate over selected namespaces) ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSelector {
    /// Namespaces carrying every one of these annotations are aggregated.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResourceQuotaSpec {
    #[serde(default)]
    pub quota: ResourceQuotaObjectSpec,
    #[serde(default)]
    pub selector: QuotaSelector,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResourceQuotaStatus {
    #[serde(default)]
    pub total: QuotaStatus,
}

/// Quota aggregated over every namespace matched by its selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResourceQuota {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: ClusterResourceQuotaSpec,
    #[serde(default)]
    pub status: ClusterResourceQuotaStatus,
    pub created_at: DateTime<Utc>,
}

impl ClusterResourceQuota {
    pub fn new(name: impl Into<String>, selector: QuotaSelector, hard: ResourceList) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            spec: ClusterResourceQuotaSpec {
                quota: ResourceQuotaObjectSpec { hard },
                selector,
            },
            status: ClusterResourceQuotaStatus::default(),
            created_at: Utc::now(),
        }
    }
}

// --- Shared accessors ---

/// Common view over both quota kinds.
pub trait QuotaAccessor {
    fn hard(&self) -> &ResourceList;
    fn set_hard(&mut self, hard: ResourceList);
    fn used(&self) -> &ResourceList;
}

impl QuotaAccessor for ResourceQuota {
    fn hard(&self) -> &ResourceList {
        &self.spec.hard
    }
    fn set_hard(&mut self, hard: ResourceList) {
        self.spec.hard = hard;
    }
    fn used(&self) -> &ResourceList {
        &self.status.used
    }
}

impl QuotaAccessor for ClusterResourceQuota {
    fn hard(&self) -> &ResourceList {
        &self.spec.quota.hard
    }
    fn set_hard(&mut self, hard: ResourceList) {
        self.spec.quota.hard = hard;
    }
    fn used(&self) -> &ResourceList {
        &self.status.total.used
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    NamespaceLocal,
    ClusterWide,
}

impl QuotaKind {
    pub fn from_local_flag(local: bool) -> Self {
        if local {
            QuotaKind::NamespaceLocal
        } else {
            QuotaKind::ClusterWide
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::NamespaceLocal => write!(f, "ResourceQuota"),
            QuotaKind::ClusterWide => write!(f, "ClusterResourceQuota"),
        }
    }
}

/// The enforcing quota object of a namespace, whichever kind it is.
#[derive(Debug, Clone)]
pub enum QuotaObject {
    NamespaceLocal(ResourceQuota),
    ClusterWide(ClusterResourceQuota),
}

impl QuotaObject {
    pub fn kind(&self) -> QuotaKind {
        match self {
            QuotaObject::NamespaceLocal(_) => QuotaKind::NamespaceLocal,
            QuotaObject::ClusterWide(_) => QuotaKind::ClusterWide,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            QuotaObject::NamespaceLocal(q) => &q.name,
            QuotaObject::ClusterWide(q) => &q.name,
        }
    }
}

impl QuotaAccessor for QuotaObject {
    fn hard(&self) -> &ResourceList {
        match self {
            QuotaObject::NamespaceLocal(q) => q.hard(),
            QuotaObject::ClusterWide(q) => q.hard(),
        }
    }
    fn set_hard(&mut self, hard: ResourceList) {
        match self {
            QuotaObject::NamespaceLocal(q) => q.set_hard(hard),
            QuotaObject::ClusterWide(q) => q.set_hard(hard),
        }
    }
    fn used(&self) -> &ResourceList {
        match self {
            QuotaObject::NamespaceLocal(q) => q.used(),
            QuotaObject::ClusterWide(q) => q.used(),
        }
    }
}
