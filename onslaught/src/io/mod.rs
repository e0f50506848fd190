//! I/O helpers for the onslaught engine.

pub mod cleanup;
pub mod config;
pub mod coverage;
pub mod identity;
pub mod path;
pub mod process;
pub mod summary;
