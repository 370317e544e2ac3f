//! SlateDB-backed object store, watch log, and typed registry access.

pub mod client;
pub mod error;
pub mod hierarchy;
pub mod registry;
pub mod watch;
