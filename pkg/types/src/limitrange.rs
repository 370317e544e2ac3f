use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceList;

/// Floor/ceiling/default applied to one type of object in a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitRangeItem {
    /// `Container`, `Pod` or `PersistentVolumeClaim`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub min: ResourceList,
    #[serde(default)]
    pub max: ResourceList,
    #[serde(default)]
    pub default: ResourceList,
    #[serde(default)]
    pub default_request: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRangeSpec {
    #[serde(default)]
    pub limits: Vec<LimitRangeItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitRange {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub spec: LimitRangeSpec,
    pub created_at: DateTime<Utc>,
}

impl LimitRange {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: LimitRangeSpec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
            created_at: Utc::now(),
        }
    }
}
