//! Label, annotation and finalizer keys stamped on hierarchy objects.

/// Prefix shared by every hierarchy label and annotation.
pub const HNS_PREFIX: &str = "hns.k3rs.io/";

// ─── Labels ───────────────────────────────────────────────────────────────

/// Name of the parent namespace.
pub const LABEL_PARENT: &str = "hns.k3rs.io/parent";

/// Role of the namespace in its hierarchy (`root`, `leaf` or `none`).
pub const LABEL_ROLE: &str = "hns.k3rs.io/role";

/// Marks a namespace (or a Subnamespace request) as a resource pool member.
pub const LABEL_RESOURCE_POOL: &str = "hns.k3rs.io/resourcepool";

/// Present on every namespace managed by the hierarchy.
pub const LABEL_HIERARCHY: &str = "hns.k3rs.io/hns";

/// Set on role bindings copied down from an ancestor namespace.
pub const LABEL_PROPAGATED_FROM: &str = "hns.k3rs.io/propagated-from";

pub const ROLE_ROOT: &str = "root";
pub const ROLE_LEAF: &str = "leaf";
pub const ROLE_NONE: &str = "none";

// ─── Annotations ──────────────────────────────────────────────────────────

/// Depth of the namespace below its cluster root (root = 0).
pub const ANNOTATION_DEPTH: &str = "hns.k3rs.io/depth";

/// Slash separated chain of names from the cluster root down to the namespace.
pub const ANNOTATION_DISPLAY_NAME: &str = "hns.k3rs.io/display-name";

/// Selector annotations: `crq-selector-<depth>` = name of the ancestor at that depth.
pub const ANNOTATION_CRQ_SELECTOR_PREFIX: &str = "hns.k3rs.io/crq-selector-";

/// Set to "true" on the topmost namespace of a contiguous resource-pool chain.
pub const ANNOTATION_UPPER_RESOURCE_POOL: &str = "hns.k3rs.io/is-upper-rp";

/// Per-root override of the enforcement-root depth.
pub const ANNOTATION_RQ_DEPTH: &str = "hns.k3rs.io/rq-depth";

/// Prefix of the annotations recording root headroom reserved by a migration.
/// Full key = `ANNOTATION_MIGRATION_HEADROOM_PREFIX + migration_name`.
pub const ANNOTATION_MIGRATION_HEADROOM_PREFIX: &str = "hns.k3rs.io/migration-headroom-";

// ─── Finalizers ───────────────────────────────────────────────────────────

/// Holds a hierarchy namespace until its subnamespace and quota objects are cleaned up.
pub const FINALIZER_TEARDOWN: &str = "hns.k3rs.io/teardown";

/// Name given to the default limit range created in every subnamespace.
pub const DEFAULT_LIMIT_RANGE_NAME: &str = "hns-default-limits";
