//! Object types of the hierarchical namespace manager.

pub mod config;
pub mod limitrange;
pub mod namespace;
pub mod quota;
pub mod rbac;
pub mod resources;
pub mod subnamespace;
pub mod task;
pub mod validate;
