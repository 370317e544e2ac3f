//! Controller and dispatcher tuning.

/// Default depth up to which subnamespaces get a namespace-local ResourceQuota.
pub const DEFAULT_ROOT_DEPTH: u32 = 1;

/// Default ceiling on the number of namespaces sharing one enforcement root.
pub const DEFAULT_MAX_SUBNAMESPACES: usize = 250;

/// Attempts made by a consistency poll before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Delay between consistency poll attempts, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Delay used when a task waits on another task, in seconds.
pub const DEFAULT_REQUEUE_SECS: u64 = 2;

/// Interval of the full resync pass over every hierarchy object, in seconds.
pub const RESYNC_INTERVAL_SECS: u64 = 300;
