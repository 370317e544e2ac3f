use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::subnamespace::ResourceQuotaSpec;

// --- Task phase ---

/// Lifecycle of a one-shot task. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TaskPhase {
    #[default]
    #[serde(rename = "")]
    None,
    InProgress,
    Complete,
    Error,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Complete | TaskPhase::Error)
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::None => write!(f, "None"),
            TaskPhase::InProgress => write!(f, "InProgress"),
            TaskPhase::Complete => write!(f, "Complete"),
            TaskPhase::Error => write!(f, "Error"),
        }
    }
}

// --- UpdateQuota ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuotaSpec {
    pub source_namespace: String,
    pub dest_namespace: String,
    #[serde(default)]
    pub resource_quota: ResourceQuotaSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuotaStatus {
    #[serde(default)]
    pub phase: TaskPhase,
    #[serde(default)]
    pub reason: String,
    /// Tree edges already adjusted; lets an interrupted move resume.
    #[serde(default)]
    pub applied_edges: u32,
}

/// Request to move quota from one namespace to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateQuota {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: UpdateQuotaSpec,
    #[serde(default)]
    pub status: UpdateQuotaStatus,
    pub created_at: DateTime<Utc>,
}

impl UpdateQuota {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        dest: impl Into<String>,
        hard: crate::resources::ResourceList,
    ) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
            spec: UpdateQuotaSpec {
                source_namespace: source.into(),
                dest_namespace: dest.into(),
                resource_quota: ResourceQuotaSpec { hard },
            },
            status: UpdateQuotaStatus::default(),
            created_at: Utc::now(),
        }
    }
}

// --- MigrationHierarchy ---

/// Position of an in-progress migration, persisted so a restart resumes there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MigrationStep {
    #[default]
    PreStage,
    AwaitPreStage,
    Relocate,
    Relabel,
    Reclaim,
    AwaitReclaim,
}

impl std::fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStep::PreStage => write!(f, "PreStage"),
            MigrationStep::AwaitPreStage => write!(f, "AwaitPreStage"),
            MigrationStep::Relocate => write!(f, "Relocate"),
            MigrationStep::Relabel => write!(f, "Relabel"),
            MigrationStep::Reclaim => write!(f, "Reclaim"),
            MigrationStep::AwaitReclaim => write!(f, "AwaitReclaim"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationHierarchySpec {
    pub current_namespace: String,
    pub to_namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationHierarchyStatus {
    #[serde(default)]
    pub phase: TaskPhase,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub step: MigrationStep,
    /// Parent the subtree was moved away from, captured before relocation.
    #[serde(default)]
    pub old_parent: String,
    /// Quota carried by the subtree root; empty when it does not enforce.
    #[serde(default)]
    pub allocation: ResourceQuotaSpec,
}

/// Request to re-parent a subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationHierarchy {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: MigrationHierarchySpec,
    #[serde(default)]
    pub status: MigrationHierarchyStatus,
    pub created_at: DateTime<Utc>,
}

impl MigrationHierarchy {
    pub fn new(
        name: impl Into<String>,
        current: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
            spec: MigrationHierarchySpec {
                current_namespace: current.into(),
                to_namespace: to.into(),
            },
            status: MigrationHierarchyStatus::default(),
            created_at: Utc::now(),
        }
    }
}
