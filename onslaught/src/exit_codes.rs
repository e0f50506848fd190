//! Stable exit codes for the onslaught CLI.

/// Every gate passed.
pub const OK: i32 = 0;
/// A gate reported that the target failed it.
pub const GATE_FAILED: i32 = 1;
/// Reserved: clap exits with 2 on usage errors.
pub const USAGE: i32 = 2;
/// Unexpected internal error; the full trace is in `logs/main.log`.
pub const FATAL: i32 = 3;
