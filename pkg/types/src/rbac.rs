use pkg_constants::hns::LABEL_PROPAGATED_FROM;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Subject ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

// --- RoleBinding ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub role_ref: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl RoleBinding {
    /// Namespace this binding was copied down from, when it was propagated.
    pub fn propagated_from(&self) -> Option<&str> {
        self.labels.get(LABEL_PROPAGATED_FROM).map(String::as_str)
    }
}
