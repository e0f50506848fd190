//! Machine-readable run summary written to `<results>/summary.json`.

use anyhow::{Context, Result};
use serde::Serialize;

use super::path::SandboxPath;
use crate::core::phase::PhaseState;

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    GateFailed,
    Fatal,
}

/// One executed step, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub index: u32,
    /// Log stem, e.g. `phase.flake8`.
    pub name: String,
    /// Log file name relative to the log directory.
    pub log: String,
    pub outcome: PhaseState,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub package: String,
    pub target: String,
    pub results_dir: String,
    pub verdict: Verdict,
    pub steps: Vec<StepRecord>,
}

pub fn write_summary(path: &SandboxPath, summary: &RunSummary) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    buf.push('\n');
    path.write(buf)
}
