//! Centralized constants for the hierarchical namespace manager.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod controller;
pub mod hns;
pub mod paths;
pub mod state;
