use chrono::{DateTime, Utc};
use pkg_constants::hns::LABEL_RESOURCE_POOL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resources::ResourceList;

// --- Phase ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SubnamespacePhase {
    /// Never reconciled.
    #[default]
    #[serde(rename = "")]
    None,
    /// Recreated for a namespace whose Subnamespace object had disappeared.
    Missing,
    /// Created by a migration under its new parent; the namespace already exists.
    Migrated,
    Created,
}

impl std::fmt::Display for SubnamespacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnamespacePhase::None => write!(f, "None"),
            SubnamespacePhase::Missing => write!(f, "Missing"),
            SubnamespacePhase::Migrated => write!(f, "Migrated"),
            SubnamespacePhase::Created => write!(f, "Created"),
        }
    }
}

// --- Spec / status ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: ResourceList,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnamespaceSpec {
    #[serde(default)]
    pub resource_quota: ResourceQuotaSpec,
}

/// Quota declared by one child subnamespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildAllocation {
    pub namespace: String,
    #[serde(default)]
    pub resource_quota: ResourceQuotaSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTotals {
    #[serde(default)]
    pub allocated: ResourceList,
    #[serde(default)]
    pub free: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnamespaceStatus {
    #[serde(default)]
    pub phase: SubnamespacePhase,
    #[serde(default)]
    pub namespaces: Vec<ChildAllocation>,
    #[serde(default)]
    pub total: AllocationTotals,
}

// --- Subnamespace ---

/// Request for a child namespace, stored in its parent's namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnamespace {
    pub name: String,
    /// The parent namespace this request lives in.
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: SubnamespaceSpec,
    #[serde(default)]
    pub status: SubnamespaceStatus,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every write; 0 until first stored.
    #[serde(default)]
    pub resource_version: u64,
}

impl Subnamespace {
    pub fn new(parent: impl Into<String>, name: impl Into<String>, hard: ResourceList) -> Self {
        Self {
            name: name.into(),
            namespace: parent.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            spec: SubnamespaceSpec {
                resource_quota: ResourceQuotaSpec { hard },
            },
            status: SubnamespaceStatus::default(),
            deletion_timestamp: None,
            created_at: Utc::now(),
            resource_version: 0,
        }
    }

    pub fn hard(&self) -> &ResourceList {
        &self.spec.resource_quota.hard
    }

    pub fn set_hard(&mut self, hard: ResourceList) {
        self.spec.resource_quota.hard = hard;
    }

    pub fn phase(&self) -> SubnamespacePhase {
        self.status.phase
    }

    /// Pool flag requested on the object, if any.
    pub fn requested_pool(&self) -> Option<bool> {
        self.labels
            .get(LABEL_RESOURCE_POOL)
            .map(|v| v == "true")
    }

    pub fn set_pool_label(&mut self, pool: bool) {
        self.labels
            .insert(LABEL_RESOURCE_POOL.to_string(), pool.to_string());
    }
}
