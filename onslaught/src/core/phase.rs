//! Phase descriptors and step log naming.
//!
//! A [`Phase`] is an immutable description of one external process
//! invocation. The session decides when it runs and where its log lands; the
//! descriptor only says what to run.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Log-name prefix for quality gates, as opposed to setup steps.
pub const GATE_LOG_PREFIX: &str = "phase.";

/// Text transform applied to a step log after the process exits.
pub type LogFilter = Box<dyn Fn(&str) -> String>;

/// Lifecycle of one executed step.
///
/// `Running` only shows in a summary if the step never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Running,
    Succeeded,
    /// The target failed the gate.
    FailedPolicy,
    /// The tooling broke.
    FailedFatal,
}

/// Build the log file name for step `index`: `{index:02}.{stem}.log`.
pub fn step_log_name(index: u32, stem: &str) -> String {
    format!("{index:02}.{stem}.log")
}

/// Reduce an installer specifier such as `twisted >= 14.0` to a name usable in
/// a log file name (`twisted`).
pub fn spec_log_name(spec: &str) -> String {
    let name: String = spec
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        .collect();
    if name.is_empty() {
        "unnamed".to_string()
    } else {
        name
    }
}

/// One named external command.
pub struct Phase {
    name: String,
    gate: bool,
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    filter: Option<LogFilter>,
}

impl Phase {
    /// A setup step (environment provisioning, dependency install, reports).
    /// Its failures are never attributed to the target.
    pub fn setup(name: impl Into<String>, program: impl AsRef<OsStr>) -> Self {
        Self::new(name.into(), false, program.as_ref())
    }

    /// A quality gate. A nonzero exit means the target failed this gate.
    pub fn gate(name: impl Into<String>, program: impl AsRef<OsStr>) -> Self {
        Self::new(name.into(), true, program.as_ref())
    }

    fn new(name: String, gate: bool, program: &OsStr) -> Self {
        Self {
            name,
            gate,
            program: program.to_os_string(),
            args: Vec::new(),
            current_dir: None,
            filter: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Run with `dir` as the working directory instead of the session default.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Rewrite the captured log through `filter`; the rewritten copy is
    /// stored next to the raw log with a `.patched` suffix.
    pub fn filter(mut self, filter: impl Fn(&str) -> String + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stem used in the step log name (`phase.flake8`, `virtualenv`).
    pub fn log_stem(&self) -> String {
        if self.gate {
            format!("{GATE_LOG_PREFIX}{}", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn log_filter(&self) -> Option<&LogFilter> {
        self.filter.as_ref()
    }

    /// Space-joined command line for diagnostics. Not shell-escaped.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("gate", &self.gate)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("current_dir", &self.current_dir)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}
