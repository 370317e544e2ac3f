use chrono::{DateTime, Utc};
use pkg_constants::hns::{
    ANNOTATION_CRQ_SELECTOR_PREFIX, ANNOTATION_DEPTH, ANNOTATION_DISPLAY_NAME, ANNOTATION_RQ_DEPTH,
    ANNOTATION_UPPER_RESOURCE_POOL, LABEL_HIERARCHY, LABEL_PARENT, LABEL_RESOURCE_POOL, LABEL_ROLE,
    ROLE_LEAF, ROLE_NONE, ROLE_ROOT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Role ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceRole {
    /// Top of a hierarchy, created by an administrator.
    Root,
    /// Subnamespace without children.
    Leaf,
    /// Subnamespace with at least one child.
    NoRole,
}

impl NamespaceRole {
    pub fn as_label(&self) -> &'static str {
        match self {
            NamespaceRole::Root => ROLE_ROOT,
            NamespaceRole::Leaf => ROLE_LEAF,
            NamespaceRole::NoRole => ROLE_NONE,
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            ROLE_ROOT => Some(NamespaceRole::Root),
            ROLE_LEAF => Some(NamespaceRole::Leaf),
            ROLE_NONE => Some(NamespaceRole::NoRole),
            _ => None,
        }
    }
}

impl std::fmt::Display for NamespaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceRole::Root => write!(f, "Root"),
            NamespaceRole::Leaf => write!(f, "Leaf"),
            NamespaceRole::NoRole => write!(f, "NoRole"),
        }
    }
}

// --- Namespace ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Set when deletion was requested while finalizers were still present.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            finalizers: Vec::new(),
            deletion_timestamp: None,
            created_at: Utc::now(),
        }
    }

    /// Build a cluster root namespace (depth 0, display-path = own name).
    pub fn new_root(name: impl Into<String>) -> Self {
        let mut ns = Self::new(name);
        ns.labels.insert(LABEL_HIERARCHY.to_string(), "true".to_string());
        ns.labels
            .insert(LABEL_ROLE.to_string(), ROLE_ROOT.to_string());
        ns.labels
            .insert(LABEL_RESOURCE_POOL.to_string(), "false".to_string());
        ns.annotations
            .insert(ANNOTATION_DEPTH.to_string(), "0".to_string());
        ns.annotations
            .insert(ANNOTATION_DISPLAY_NAME.to_string(), ns.name.clone());
        ns.annotations
            .insert(selector_annotation(0), ns.name.clone());
        ns
    }

    pub fn is_in_hierarchy(&self) -> bool {
        self.labels.get(LABEL_HIERARCHY).map(String::as_str) == Some("true")
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn parent(&self) -> Option<&str> {
        self.labels
            .get(LABEL_PARENT)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    pub fn role(&self) -> Option<NamespaceRole> {
        self.labels
            .get(LABEL_ROLE)
            .and_then(|r| NamespaceRole::from_label(r))
    }

    pub fn set_role(&mut self, role: NamespaceRole) {
        self.labels
            .insert(LABEL_ROLE.to_string(), role.as_label().to_string());
    }

    pub fn depth(&self) -> u32 {
        self.annotations
            .get(ANNOTATION_DEPTH)
            .and_then(|d| d.parse().ok())
            .unwrap_or(0)
    }

    /// Slash separated chain from the cluster root to this namespace.
    pub fn display_name(&self) -> &str {
        self.annotations
            .get(ANNOTATION_DISPLAY_NAME)
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    pub fn display_path(&self) -> Vec<String> {
        self.display_name().split('/').map(str::to_string).collect()
    }

    /// Name of the cluster root this namespace hangs under.
    pub fn cluster_root(&self) -> &str {
        self.display_name().split('/').next().unwrap_or(&self.name)
    }

    pub fn is_resource_pool(&self) -> bool {
        self.labels.get(LABEL_RESOURCE_POOL).map(String::as_str) == Some("true")
    }

    pub fn set_resource_pool(&mut self, pool: bool) {
        self.labels
            .insert(LABEL_RESOURCE_POOL.to_string(), pool.to_string());
    }

    pub fn is_upper_resource_pool(&self) -> bool {
        self.annotations
            .get(ANNOTATION_UPPER_RESOURCE_POOL)
            .map(String::as_str)
            == Some("true")
    }

    pub fn set_upper_resource_pool(&mut self, upper: bool) {
        if upper {
            self.annotations
                .insert(ANNOTATION_UPPER_RESOURCE_POOL.to_string(), "true".to_string());
        } else {
            self.annotations.remove(ANNOTATION_UPPER_RESOURCE_POOL);
        }
    }

    /// Per-root override of the enforcement-root depth.
    pub fn rq_depth_override(&self) -> Option<u32> {
        self.annotations
            .get(ANNOTATION_RQ_DEPTH)
            .and_then(|d| d.parse().ok())
    }

    /// Selector annotations (`crq-selector-<depth>`) carried by this namespace.
    pub fn selector_annotations(&self) -> BTreeMap<String, String> {
        self.annotations
            .iter()
            .filter(|(k, _)| k.starts_with(ANNOTATION_CRQ_SELECTOR_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Key of the selector annotation naming the ancestor at `depth`.
pub fn selector_annotation(depth: u32) -> String {
    format!("{}{}", ANNOTATION_CRQ_SELECTOR_PREFIX, depth)
}
