//! Run a Python project through a fixed battery of quality gates.
//!
//! Each run gets a fresh results directory holding an isolated virtualenv,
//! a working copy of the target, and one numbered log per step. Gates run
//! strictly in order (flake8, sdist build, sdist log check, sdist install,
//! unit tests under coverage) and the first failing gate ends the run.
//!
//! - **[`core`]**: Pure logic: path normalization, phase descriptors and log
//!   naming, redaction, sdist log scanning. No I/O.
//! - **[`io`]**: Side effects: sandboxed paths, cleanup of the target tree,
//!   child processes, configuration, the package identity probe.
//!
//! [`session`] and [`pipeline`] combine the two into a run.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
