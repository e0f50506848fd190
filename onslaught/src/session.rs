//! Run context and phase executor.
//!
//! A [`Session`] owns everything one run creates under its results
//! directory:
//!
//! ```text
//! <results>/
//!   logs/main.log          every lifecycle message of the run
//!   logs/NN.<step>.log     raw combined output of step NN
//!   targetsrc/             working copy of the target
//!   workdir/               cwd for steps without their own
//!   venv/                  isolated execution environment
//!   dist/                  the single build artifact
//!   coverage.orig/         raw HTML coverage report
//!   coverage/              the same report with install paths redacted
//!   summary.json
//! ```
//!
//! Steps run strictly one after another; each one gets the next index, so
//! log names sort in execution order.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::core::phase::{Phase, PhaseState, step_log_name};
use crate::core::redact::SitePackagesRedactor;
use crate::error::{CommandError, PhaseError, SetupError, StepError};
use crate::io::config::ToolchainConfig;
use crate::io::identity::{IdentityProbe, PackageIdentity};
use crate::io::path::{PushdGuard, SandboxPath};
use crate::io::process::run_to_log;
use crate::io::summary::{RunSummary, StepRecord, Verdict};
use crate::logging::LogHandle;

/// Inputs for [`Session::prepare`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub target: SandboxPath,
    /// Explicit results directory. `None` uses
    /// `$HOME/.onslaught/results/<package>`.
    pub results: Option<SandboxPath>,
    pub config: ToolchainConfig,
}

#[derive(Debug)]
pub struct Session {
    real_target: SandboxPath,
    package: PackageIdentity,
    redactor: SitePackagesRedactor,
    results_dir: SandboxPath,
    target_copy: SandboxPath,
    log_dir: SandboxPath,
    work_dir: SandboxPath,
    config: ToolchainConfig,
    next_index: u32,
    steps: Vec<StepRecord>,
}

impl Session {
    /// Derive the package identity, start a fresh results directory, attach
    /// `logs/main.log` to `log`, and copy the target into it.
    ///
    /// The identity probe runs exactly once. Any failure here is fatal: no
    /// phase has run yet.
    #[instrument(skip_all, fields(target = %options.target))]
    pub fn prepare(
        options: SessionOptions,
        probe: &dyn IdentityProbe,
        log: &LogHandle,
    ) -> Result<Self> {
        let SessionOptions {
            target,
            results,
            config,
        } = options;

        let package = probe
            .package_name(&target)
            .with_context(|| format!("derive package name of {target}"))?;
        let redactor = SitePackagesRedactor::new(package.as_str())?;

        let results_dir = match results {
            Some(dir) => {
                debug!(path = %dir, "using results directory");
                dir
            }
            None => {
                let dir = default_results_dir(env::var_os("HOME"), &package)?;
                info!("Onslaught results directory: {dir}");
                dir
            }
        };
        check_disjoint(&results_dir, &target)?;
        results_dir.remove_recursive()?;
        results_dir.ensure_is_directory()?;

        let log_dir = results_dir.join("logs");
        log_dir.ensure_is_directory()?;
        log.attach_main_log(&log_dir.join("main.log"))?;
        debug!(package = %package, target = %target, "session started");

        let target_copy = results_dir.join("targetsrc");
        target.copy_tree(&target_copy)?;

        let work_dir = results_dir.join("workdir");
        work_dir.ensure_is_directory()?;

        Ok(Self {
            real_target: target,
            package,
            redactor,
            results_dir,
            target_copy,
            log_dir,
            work_dir,
            config,
            next_index: 0,
            steps: Vec::new(),
        })
    }

    pub fn package(&self) -> &PackageIdentity {
        &self.package
    }

    pub fn redactor(&self) -> &SitePackagesRedactor {
        &self.redactor
    }

    /// The caller's target tree. Never written by the session itself.
    pub fn real_target(&self) -> &SandboxPath {
        &self.real_target
    }

    pub fn results_dir(&self) -> &SandboxPath {
        &self.results_dir
    }

    pub fn target_copy(&self) -> &SandboxPath {
        &self.target_copy
    }

    pub fn log_dir(&self) -> &SandboxPath {
        &self.log_dir
    }

    pub fn work_dir(&self) -> &SandboxPath {
        &self.work_dir
    }

    pub fn venv_dir(&self) -> SandboxPath {
        self.results_dir.join("venv")
    }

    /// Executable `name` inside the session's virtualenv.
    pub fn venv_tool(&self, name: &str) -> SandboxPath {
        self.venv_dir().join("bin").join(name)
    }

    pub fn dist_dir(&self) -> SandboxPath {
        self.results_dir.join("dist")
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Steps executed so far, in order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Make the session's work directory the process cwd until the guard
    /// drops.
    pub fn pushd_workdir(&self) -> Result<PushdGuard> {
        self.work_dir.pushd()
    }

    /// Run one step with its output captured to the next numbered log.
    ///
    /// Returns the log to read: the `.patched` copy when the phase has a log
    /// filter, the raw log otherwise. A nonzero exit or timeout is a
    /// [`CommandError`] carrying that same log.
    #[instrument(skip_all, fields(step = %phase.log_stem()))]
    pub fn run(&mut self, phase: &Phase) -> Result<SandboxPath, StepError> {
        let index = self.next_index;
        self.next_index += 1;
        let log_name = step_log_name(index, &phase.log_stem());
        let raw_log = self.log_dir.join(&log_name);
        self.steps.push(StepRecord {
            index,
            name: phase.log_stem(),
            log: log_name,
            outcome: PhaseState::Running,
        });
        debug!(command = %phase.command_line(), log = %raw_log, "running step");

        let result = self.execute(phase, &raw_log);
        self.set_last_outcome(if result.is_ok() {
            PhaseState::Succeeded
        } else {
            PhaseState::FailedFatal
        });
        result
    }

    fn execute(&self, phase: &Phase, raw_log: &SandboxPath) -> Result<SandboxPath, StepError> {
        let mut cmd = Command::new(phase.program());
        cmd.args(phase.arguments())
            .current_dir(phase.working_dir().unwrap_or(self.work_dir.as_path()));
        let timeout = self.config.phase_timeout();
        let exit = run_to_log(cmd, raw_log.as_path(), timeout)?;

        let log_path = match phase.log_filter() {
            Some(filter) => {
                let patched = patched_log_path(raw_log);
                let text = raw_log.read_lossy()?;
                patched.write(filter(&text))?;
                debug!(log = %patched, "wrote filtered log");
                patched
            }
            None => raw_log.clone(),
        };

        let program = phase.program().to_string_lossy().into_owned();
        if exit.timed_out {
            return Err(CommandError::TimedOut {
                program,
                timeout_secs: timeout.map_or(0, |limit| limit.as_secs()),
                log_path,
            }
            .into());
        }
        if !exit.success() {
            return Err(CommandError::Exited {
                program,
                status: exit.status,
                log_path,
            }
            .into());
        }
        Ok(log_path)
    }

    /// Run a quality gate and report it with one summary line.
    ///
    /// A nonzero exit (or timeout) is the target's fault: the log is echoed
    /// at warning level and the result is [`PhaseError::Policy`]. Anything
    /// else is [`PhaseError::Fatal`].
    pub fn run_phase(&mut self, phase: &Phase) -> Result<SandboxPath, PhaseError> {
        let label = phase_label(phase.name());
        debug!("{label} running...");
        match self.run(phase) {
            Ok(log_path) => {
                info!("{label} - passed.");
                Ok(log_path)
            }
            Err(StepError::Command(err)) => {
                let log_path = err.log_path().clone();
                let text = log_path
                    .read_lossy()
                    .unwrap_or_else(|read_err| format!("<unreadable log: {read_err:#}>"));
                warn!("{label} - FAILED:\n{text}");
                self.set_last_outcome(PhaseState::FailedPolicy);
                Err(PhaseError::Policy {
                    phase: phase.name().to_string(),
                    log_path,
                })
            }
            Err(StepError::Other(error)) => {
                error!("{label} - unexpected error: {error:#}");
                Err(PhaseError::Fatal {
                    phase: phase.name().to_string(),
                    error,
                })
            }
        }
    }

    pub fn summary(&self, verdict: Verdict) -> RunSummary {
        RunSummary {
            package: self.package.to_string(),
            target: self.real_target.to_string(),
            results_dir: self.results_dir.to_string(),
            verdict,
            steps: self.steps.clone(),
        }
    }

    pub fn summary_path(&self) -> SandboxPath {
        self.results_dir.join("summary.json")
    }

    fn set_last_outcome(&mut self, outcome: PhaseState) {
        if let Some(step) = self.steps.last_mut() {
            step.outcome = outcome;
        }
    }
}

/// `$HOME/.onslaught/results/<package>`.
pub fn default_results_dir(
    home: Option<OsString>,
    package: &PackageIdentity,
) -> Result<SandboxPath> {
    let home = home
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or(SetupError::NoHome)?;
    SandboxPath::new(
        home.join(".onslaught")
            .join("results")
            .join(package.as_str()),
    )
}

// Purging a results directory that contains the target (or copying a
// target into a results directory nested inside it) would destroy or
// recurse into the caller's tree.
fn check_disjoint(results: &SandboxPath, target: &SandboxPath) -> Result<(), SetupError> {
    if results.as_path().starts_with(target) || target.as_path().starts_with(results) {
        return Err(SetupError::ResultsOverlapTarget {
            results: results.clone(),
            target: target.clone(),
        });
    }
    Ok(())
}

fn patched_log_path(raw_log: &SandboxPath) -> SandboxPath {
    let mut name = raw_log.basename();
    name.push_str(".patched");
    match raw_log.parent() {
        Some(parent) => parent.join(name),
        None => raw_log.join(name),
    }
}

fn phase_label(name: &str) -> String {
    format!("Test Phase {:<18}", format!("'{name}'"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingProbe {
        calls: Cell<u32>,
    }

    impl CountingProbe {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
            }
        }
    }

    impl IdentityProbe for CountingProbe {
        fn package_name(&self, _target: &SandboxPath) -> Result<PackageIdentity> {
            self.calls.set(self.calls.get() + 1);
            PackageIdentity::parse("demo")
        }
    }

    struct BrokenProbe;

    impl IdentityProbe for BrokenProbe {
        fn package_name(&self, _target: &SandboxPath) -> Result<PackageIdentity> {
            anyhow::bail!("setup.py --name exited with status 1")
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        target: SandboxPath,
        results: SandboxPath,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = SandboxPath::new(temp.path()).expect("root");
        let target = root.join("project");
        target.join("demo").ensure_is_directory().expect("mkdir");
        target.join("setup.py").write("setup()\n").expect("write");
        target.join("demo/__init__.py").write("").expect("write");
        Fixture {
            _temp: temp,
            target,
            results: root.join("results"),
        }
    }

    fn prepare(fx: &Fixture, config: ToolchainConfig) -> Session {
        let options = SessionOptions {
            target: fx.target.clone(),
            results: Some(fx.results.clone()),
            config,
        };
        Session::prepare(options, &CountingProbe::new(), &LogHandle::detached()).expect("prepare")
    }

    fn sh(name: &str, script: &str) -> Phase {
        Phase::gate(name, "sh").arg("-c").arg(script)
    }

    #[test]
    fn prepare_computes_identity_once_and_lays_out_results() {
        let fx = fixture();
        let probe = CountingProbe::new();
        let options = SessionOptions {
            target: fx.target.clone(),
            results: Some(fx.results.clone()),
            config: ToolchainConfig::default(),
        };

        let session = Session::prepare(options, &probe, &LogHandle::detached()).expect("prepare");

        assert_eq!(probe.calls.get(), 1);
        assert_eq!(session.package().as_str(), "demo");
        assert!(session.log_dir().is_dir());
        assert!(session.work_dir().is_dir());
        assert!(session.target_copy().join("demo/__init__.py").is_file());
        assert_eq!(
            session.venv_tool("pip"),
            fx.results.join("venv").join("bin").join("pip")
        );
    }

    #[test]
    fn prepare_purges_existing_results_directory() {
        let fx = fixture();
        fx.results.join("old/deep").ensure_is_directory().expect("mkdir");
        fx.results.join("stale.txt").write("stale").expect("write");
        fx.results.join("logs").ensure_is_directory().expect("mkdir");
        fx.results
            .join("logs/07.phase.flake8.log")
            .write("old")
            .expect("write");

        let session = prepare(&fx, ToolchainConfig::default());

        let children: Vec<String> = session
            .results_dir()
            .list_children()
            .expect("list")
            .iter()
            .map(SandboxPath::basename)
            .collect();
        assert_eq!(children, ["logs", "targetsrc", "workdir"]);
        assert!(session.log_dir().list_children().expect("list").is_empty());
    }

    #[test]
    fn identity_failure_is_an_error_before_results_are_touched() {
        let fx = fixture();
        fx.results.ensure_is_directory().expect("mkdir");
        fx.results.join("keep.txt").write("keep").expect("write");
        let options = SessionOptions {
            target: fx.target.clone(),
            results: Some(fx.results.clone()),
            config: ToolchainConfig::default(),
        };

        let err = Session::prepare(options, &BrokenProbe, &LogHandle::detached()).unwrap_err();

        assert!(format!("{err:#}").contains("derive package name"));
        assert!(fx.results.join("keep.txt").is_file());
    }

    #[test]
    fn results_inside_target_is_rejected() {
        let fx = fixture();
        let options = SessionOptions {
            target: fx.target.clone(),
            results: Some(fx.target.join("results")),
            config: ToolchainConfig::default(),
        };

        let err =
            Session::prepare(options, &CountingProbe::new(), &LogHandle::detached()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::ResultsOverlapTarget { .. })
        ));
        assert!(fx.target.join("setup.py").is_file());
    }

    #[test]
    fn default_results_dir_is_keyed_by_package() {
        let package = PackageIdentity::parse("demo").expect("identity");
        let dir = default_results_dir(Some(OsString::from("/home/u")), &package).expect("dir");
        assert_eq!(dir.as_path(), std::path::Path::new("/home/u/.onslaught/results/demo"));

        let err = default_results_dir(None, &package).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::NoHome)
        ));
    }

    #[test]
    fn step_indices_increase_and_name_logs() {
        let fx = fixture();
        let mut session = prepare(&fx, ToolchainConfig::default());

        let first = session
            .run(&Phase::setup("virtualenv", "sh").args(["-c", "echo made"]))
            .expect("first");
        let second = session.run(&sh("flake8", "echo clean")).expect("second");

        assert_eq!(first.basename(), "00.virtualenv.log");
        assert_eq!(second.basename(), "01.phase.flake8.log");
        assert_eq!(first.read_to_string().expect("read"), "made\n");
        let indices: Vec<u32> = session.steps().iter().map(|step| step.index).collect();
        assert_eq!(indices, [0, 1]);
        assert!(session.steps().iter().all(|s| s.outcome == PhaseState::Succeeded));
    }

    #[test]
    fn steps_run_in_the_work_directory_by_default() {
        let fx = fixture();
        let mut session = prepare(&fx, ToolchainConfig::default());

        let log = session.run(&sh("pwd", "pwd")).expect("run");
        let printed = log.read_to_string().expect("read");
        let printed = SandboxPath::new(printed.trim()).expect("path");
        assert_eq!(printed.basename(), "workdir");

        let src = session.target_copy().clone();
        let log = session
            .run(&sh("pwd-src", "pwd").current_dir(src.as_path()))
            .expect("run");
        assert!(log.read_to_string().expect("read").trim().ends_with("targetsrc"));
    }

    #[test]
    fn failing_gate_is_a_policy_failure_with_its_log() {
        let fx = fixture();
        let mut session = prepare(&fx, ToolchainConfig::default());

        let err = session
            .run_phase(&sh("flake8", "echo 'E501 line too long'; exit 1"))
            .unwrap_err();

        let PhaseError::Policy { phase, log_path } = err else {
            panic!("expected policy failure, got {err:?}");
        };
        assert_eq!(phase, "flake8");
        assert_eq!(log_path.basename(), "00.phase.flake8.log");
        assert!(log_path.read_to_string().expect("read").contains("E501"));
        assert_eq!(session.steps()[0].outcome, PhaseState::FailedPolicy);
    }

    #[test]
    fn missing_executable_is_fatal() {
        let fx = fixture();
        let mut session = prepare(&fx, ToolchainConfig::default());

        let err = session
            .run_phase(&Phase::gate("flake8", "/no/such/flake8"))
            .unwrap_err();

        assert!(matches!(err, PhaseError::Fatal { .. }));
        assert_eq!(session.steps()[0].outcome, PhaseState::FailedFatal);
    }

    #[test]
    fn filtered_log_is_written_next_to_raw_log() {
        let fx = fixture();
        let mut session = prepare(&fx, ToolchainConfig::default());
        let phase = sh("unittests", "echo /x/site-packages/demo/a.py; exit 1")
            .filter(|text| text.replace("/x/site-packages", "/src"));

        let err = session.run_phase(&phase).unwrap_err();

        let PhaseError::Policy { log_path, .. } = err else {
            panic!("expected policy failure, got {err:?}");
        };
        assert_eq!(log_path.basename(), "00.phase.unittests.log.patched");
        assert_eq!(log_path.read_to_string().expect("read"), "/src/demo/a.py\n");
        let raw = session.log_dir().join("00.phase.unittests.log");
        assert!(raw.read_to_string().expect("read").contains("site-packages"));
    }

    #[test]
    fn timed_out_gate_is_a_policy_failure() {
        let fx = fixture();
        let config = ToolchainConfig {
            phase_timeout_secs: Some(1),
            ..ToolchainConfig::default()
        };
        let mut session = prepare(&fx, config);

        let err = session.run_phase(&sh("unittests", "exec sleep 30")).unwrap_err();

        let PhaseError::Policy { log_path, .. } = err else {
            panic!("expected policy failure, got {err:?}");
        };
        assert!(
            log_path
                .read_to_string()
                .expect("read")
                .contains("killed after 1 seconds")
        );
    }

    #[test]
    fn summary_lists_steps_with_verdict() {
        let fx = fixture();
        let mut session = prepare(&fx, ToolchainConfig::default());
        session.run(&sh("flake8", "true")).expect("run");

        let summary = session.summary(Verdict::Passed);

        assert_eq!(summary.package, "demo");
        assert_eq!(summary.steps.len(), 1);
        assert_eq!(summary.steps[0].log, "00.phase.flake8.log");
        assert_eq!(session.summary_path().basename(), "summary.json");
    }
}
