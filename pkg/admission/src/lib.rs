//! Admission checks run before hierarchy objects are persisted.
//!
//! Every check answers with an [`AdmissionResponse`]; a denial is a normal
//! value, only store failures surface as errors.

pub mod mutate;
pub mod validate;

use async_trait::async_trait;
use pkg_forest::NamespaceForest;
use pkg_state::client::StateStore;
use pkg_types::config::HnsConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub use validate::check_quota_change;

/// Verdict of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(default)]
    pub reason: String,
}

impl AdmissionResponse {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!("admission denied: {}", reason);
        Self {
            allowed: false,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Answers "may `user` perform `verb` in `namespace`".
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    async fn can_act(&self, user: &str, verb: &str, namespace: &str) -> bool;
}

/// Reviewer that grants everything.
pub struct AllowAll;

#[async_trait]
impl AccessReviewer for AllowAll {
    async fn can_act(&self, _user: &str, _verb: &str, _namespace: &str) -> bool {
        true
    }
}

/// Shared handles used by every admission check.
#[derive(Clone)]
pub struct Admission {
    pub store: StateStore,
    pub forest: Arc<NamespaceForest>,
    pub config: Arc<HnsConfig>,
    pub reviewer: Arc<dyn AccessReviewer>,
}

impl Admission {
    pub fn new(store: StateStore, forest: Arc<NamespaceForest>, config: Arc<HnsConfig>) -> Self {
        Self {
            store,
            forest,
            config,
            reviewer: Arc::new(AllowAll),
        }
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn AccessReviewer>) -> Self {
        self.reviewer = reviewer;
        self
    }

    async fn authorized(&self, user: &str, op: Operation, namespace: &str) -> bool {
        self.reviewer.can_act(user, op.verb(), namespace).await
    }
}
