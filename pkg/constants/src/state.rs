//! State store key layout.
//!
//! Namespaced kinds are stored as `<prefix><namespace>/<name>`,
//! cluster-scoped kinds as `<prefix><name>`.

/// Common prefix of every stored object.
pub const REGISTRY_PREFIX: &str = "/registry/";

pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

pub const SUBNAMESPACES_PREFIX: &str = "/registry/subnamespaces/";

pub const RESOURCE_QUOTAS_PREFIX: &str = "/registry/resourcequotas/";

pub const CLUSTER_RESOURCE_QUOTAS_PREFIX: &str = "/registry/clusterresourcequotas/";

pub const LIMIT_RANGES_PREFIX: &str = "/registry/limitranges/";

pub const ROLE_BINDINGS_PREFIX: &str = "/registry/rolebindings/";

pub const MIGRATION_HIERARCHIES_PREFIX: &str = "/registry/migrationhierarchies/";

pub const UPDATE_QUOTAS_PREFIX: &str = "/registry/updatequotas/";

/// Number of recent watch events kept for late subscribers.
pub const EVENT_LOG_CAPACITY: usize = 4096;
