//! Structured failures the engine classifies on.
//!
//! Everything else travels as `anyhow::Error` and is fatal by definition.

use std::process::ExitStatus;

use thiserror::Error;

use crate::exit_codes;
use crate::io::path::SandboxPath;

/// A step's process ran but did not succeed. Always carries the log.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{program} exited with {status}; log: {log_path}")]
    Exited {
        program: String,
        status: ExitStatus,
        log_path: SandboxPath,
    },
    #[error("{program} killed after {timeout_secs}s; log: {log_path}")]
    TimedOut {
        program: String,
        timeout_secs: u64,
        log_path: SandboxPath,
    },
}

impl CommandError {
    pub fn log_path(&self) -> &SandboxPath {
        match self {
            CommandError::Exited { log_path, .. } | CommandError::TimedOut { log_path, .. } => {
                log_path
            }
        }
    }
}

/// Result of a single logged step that did not succeed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The step could not be run at all (missing executable, log I/O, ...).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A gate that did not pass.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The target failed the gate.
    #[error("phase {phase} failed; log: {log_path}")]
    Policy { phase: String, log_path: SandboxPath },
    /// The tooling broke while running the gate.
    #[error("phase {phase} hit an unexpected error: {error:#}")]
    Fatal { phase: String, error: anyhow::Error },
}

/// Conditions detected by the engine itself that end a run as fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("expected exactly one build artifact in {dist_dir}, found {count}")]
    AmbiguousBuildOutput { dist_dir: SandboxPath, count: usize },
    #[error("results directory {results} overlaps the target {target}")]
    ResultsOverlapTarget {
        results: SandboxPath,
        target: SandboxPath,
    },
    #[error("no results directory given and HOME is not set")]
    NoHome,
}

/// Why a run ended without passing every gate.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("phase {phase} failed; see {log_path} (results in {results_dir})")]
    GateFailed {
        phase: String,
        log_path: SandboxPath,
        results_dir: SandboxPath,
    },
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl RunFailure {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunFailure::GateFailed { .. } => exit_codes::GATE_FAILED,
            RunFailure::Fatal(_) => exit_codes::FATAL,
        }
    }

    /// Classify a gate error, attributing policy failures to `results_dir`.
    pub fn from_phase(err: PhaseError, results_dir: &SandboxPath) -> Self {
        match err {
            PhaseError::Policy { phase, log_path } => RunFailure::GateFailed {
                phase,
                log_path,
                results_dir: results_dir.clone(),
            },
            PhaseError::Fatal { phase, error } => {
                RunFailure::Fatal(error.context(format!("phase {phase}")))
            }
        }
    }
}

impl From<StepError> for RunFailure {
    /// Setup steps are not gates: any failure, including a nonzero exit, is
    /// the tooling's fault.
    fn from(err: StepError) -> Self {
        match err {
            StepError::Command(err) => RunFailure::Fatal(anyhow::Error::new(err)),
            StepError::Other(err) => RunFailure::Fatal(err),
        }
    }
}

impl From<SetupError> for RunFailure {
    fn from(err: SetupError) -> Self {
        RunFailure::Fatal(anyhow::Error::new(err))
    }
}
