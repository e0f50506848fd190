//! The fixed battery of phases and the run verdict.
//!
//! Order: virtualenv, test tooling install, flake8, sdist build, sdist log
//! check, sdist install, unit tests under coverage, coverage reports. The
//! first gate to fail ends the run.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::phase::{Phase, spec_log_name};
use crate::core::redact::{CONSOLE_PLACEHOLDER, HTML_PLACEHOLDER};
use crate::error::{RunFailure, SetupError};
use crate::io::cleanup::with_cleanup;
use crate::io::config::ToolchainConfig;
use crate::io::coverage::simplify_coverage_tree;
use crate::io::identity::{IdentityProbe, SetupPyProbe};
use crate::io::path::SandboxPath;
use crate::io::summary::{StepRecord, Verdict, write_summary};
use crate::logging::LogHandle;
use crate::session::{Session, SessionOptions};

/// Name of the build-log validator binary shipped alongside `onslaught`.
pub const CHECK_SDIST_LOG_BIN: &str = "onslaught-check-sdist-log";

/// Everything a run needs from the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: PathBuf,
    pub results: Option<PathBuf>,
    pub config: ToolchainConfig,
}

/// A run where every gate passed.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub package: String,
    pub results_dir: SandboxPath,
    pub steps: Vec<StepRecord>,
}

/// Run the target through every phase, querying its name with the
/// configured host interpreter.
pub fn run(options: RunOptions, log: &LogHandle) -> Result<RunReport, RunFailure> {
    let probe = SetupPyProbe::new(options.config.python.clone());
    run_with_probe(options, &probe, log)
}

/// [`run`] with an explicit identity probe.
///
/// The target tree is restored to its entry state afterwards whatever the
/// outcome, and the process cwd sits in the session's work directory for
/// the duration of the phases.
#[instrument(skip_all, fields(target = %options.target.display()))]
pub fn run_with_probe(
    options: RunOptions,
    probe: &dyn IdentityProbe,
    log: &LogHandle,
) -> Result<RunReport, RunFailure> {
    let target = SandboxPath::new(&options.target)?;
    if !target.is_dir() {
        return Err(anyhow::anyhow!("target {target} is not a directory").into());
    }
    let results = options
        .results
        .as_deref()
        .map(SandboxPath::new)
        .transpose()?;

    let config = options.config;
    with_cleanup(&target, |target| {
        prepare_and_run(
            SessionOptions {
                target: target.clone(),
                results,
                config,
            },
            probe,
            log,
        )
    })?
}

fn prepare_and_run(
    options: SessionOptions,
    probe: &dyn IdentityProbe,
    log: &LogHandle,
) -> Result<RunReport, RunFailure> {
    let mut session = Session::prepare(options, probe, log)?;
    let outcome = session
        .pushd_workdir()
        .map_err(RunFailure::from)
        .and_then(|_cwd| run_phases(&mut session));

    let verdict = match &outcome {
        Ok(()) => Verdict::Passed,
        Err(RunFailure::GateFailed { .. }) => Verdict::GateFailed,
        Err(RunFailure::Fatal(_)) => Verdict::Fatal,
    };
    // A summary write failure never changes the verdict.
    if let Err(err) = write_summary(&session.summary_path(), &session.summary(verdict)) {
        warn!(err = %format!("{err:#}"), "failed to write run summary");
    }

    outcome.map(|()| RunReport {
        package: session.package().to_string(),
        results_dir: session.results_dir().clone(),
        steps: session.steps().to_vec(),
    })
}

/// Every phase in order, against an already prepared session.
pub fn run_phases(session: &mut Session) -> Result<(), RunFailure> {
    prepare_virtualenv(session)?;
    install_test_utility_packages(session)?;

    let flake8 = flake8_phase(session)?;
    run_gate(session, &flake8)?;

    let build = sdist_phase(session);
    let sdist_log = run_gate(session, &build)?;
    let sdist = single_build_artifact(&session.dist_dir())?;

    let check_log = check_sdist_log_phase(session, &sdist_log)?;
    run_gate(session, &check_log)?;

    let install = install_sdist_phase(session, &sdist);
    run_gate(session, &install)?;

    let unittests = unittest_phase(session);
    run_gate(session, &unittests)?;

    coverage_report_html(session)?;
    coverage_report_stdout(session)?;
    Ok(())
}

fn run_gate(session: &mut Session, phase: &Phase) -> Result<SandboxPath, RunFailure> {
    session
        .run_phase(phase)
        .map_err(|err| RunFailure::from_phase(err, session.results_dir()))
}

/// Split a configured argv into program and leading arguments.
fn split_command<'c>(command: &'c [String], what: &str) -> Result<(&'c String, &'c [String])> {
    command
        .split_first()
        .with_context(|| format!("{what} command is empty"))
}

#[instrument(skip_all)]
fn prepare_virtualenv(session: &mut Session) -> Result<(), RunFailure> {
    info!("Preparing virtualenv.");
    let (program, args) = split_command(&session.config().virtualenv, "virtualenv")?;
    let phase = Phase::setup("virtualenv", program)
        .args(args)
        .arg(session.venv_dir().as_path());
    session.run(&phase)?;
    Ok(())
}

#[instrument(skip_all)]
fn install_test_utility_packages(session: &mut Session) -> Result<(), RunFailure> {
    let specs = session.config().test_dependencies.clone();
    if !specs.is_empty() {
        info!("Installing test utility packages.");
    }
    for spec in specs {
        let phase = pip_install(session, &format!("pip-install.{}", spec_log_name(&spec)), false)
            .arg(&spec);
        session.run(&phase)?;
    }
    Ok(())
}

fn pip_install(session: &Session, name: &str, gate: bool) -> Phase {
    let pip = session.venv_tool("pip");
    let phase = if gate {
        Phase::gate(name, pip.as_path())
    } else {
        Phase::setup(name, pip.as_path())
    };
    let phase = phase.args(["--verbose", "install"]);
    match &session.config().pip_cache_dir {
        Some(dir) => phase.arg("--cache-dir").arg(dir),
        None => phase,
    }
}

fn flake8_phase(session: &Session) -> Result<Phase> {
    let (program, args) = split_command(&session.config().flake8, "flake8")?;
    Ok(Phase::gate("flake8", program)
        .args(args)
        .arg(session.real_target().as_path()))
}

// The build has to run from inside the source tree or it silently leaves
// files out of the archive.
fn sdist_phase(session: &Session) -> Phase {
    let src = session.target_copy();
    Phase::gate("setup-sdist", session.venv_tool("python").as_path())
        .arg(src.join("setup.py").as_path())
        .args(["sdist", "--dist-dir"])
        .arg(session.dist_dir().as_path())
        .current_dir(src.as_path())
}

/// The only entry of `dist_dir`. None or several is fatal.
pub fn single_build_artifact(dist_dir: &SandboxPath) -> Result<SandboxPath, RunFailure> {
    let mut entries = if dist_dir.exists() {
        dist_dir.list_children()?
    } else {
        Vec::new()
    };
    if entries.len() != 1 {
        return Err(SetupError::AmbiguousBuildOutput {
            dist_dir: dist_dir.clone(),
            count: entries.len(),
        }
        .into());
    }
    let sdist = entries.remove(0);
    debug!(sdist = %sdist, "found build artifact");
    Ok(sdist)
}

fn check_sdist_log_phase(session: &Session, sdist_log: &SandboxPath) -> Result<Phase> {
    let (program, extra): (OsString, &[String]) = match &session.config().check_sdist_log {
        Some(command) => {
            let (program, args) = split_command(command, "check_sdist_log")?;
            (OsString::from(program), args)
        }
        None => (sibling_executable(CHECK_SDIST_LOG_BIN)?.into_os_string(), &[]),
    };
    Ok(Phase::gate("check-sdist-log", program)
        .args(extra)
        .arg(sdist_log.as_path()))
}

fn sibling_executable(name: &str) -> Result<PathBuf> {
    let exe = env::current_exe().context("locate running executable")?;
    let dir = exe
        .parent()
        .with_context(|| format!("{} has no parent directory", exe.display()))?;
    Ok(dir.join(format!("{name}{}", env::consts::EXE_SUFFIX)))
}

fn install_sdist_phase(session: &Session, sdist: &SandboxPath) -> Phase {
    pip_install(session, "install-sdist", true).arg(sdist.as_path())
}

fn unittest_phase(session: &Session) -> Phase {
    let package = session.package().as_str();
    let redactor = session.redactor().clone();
    let real_target = session.real_target().to_string();
    Phase::gate("unittests", session.venv_tool("coverage").as_path())
        .args(["run", "--branch", "--source", package])
        .arg(session.venv_tool(&session.config().test_runner).as_path())
        .arg(package)
        .filter(move |text| redactor.redact(text, &real_target).into_owned())
}

#[instrument(skip_all)]
fn coverage_report_html(session: &mut Session) -> Result<(), RunFailure> {
    let raw = session.results_dir().join("coverage.orig");
    let nice = session.results_dir().join("coverage");
    let phase = Phase::setup("coverage-report-html", session.venv_tool("coverage").as_path())
        .args(["html", "--directory"])
        .arg(raw.as_path());
    session.run(&phase)?;
    simplify_coverage_tree(&raw, &nice, session.redactor(), HTML_PLACEHOLDER)?;
    info!("Coverage report: {}", nice.join("index.html"));
    Ok(())
}

#[instrument(skip_all)]
fn coverage_report_stdout(session: &mut Session) -> Result<(), RunFailure> {
    let phase = Phase::setup("coverage-report-stdout", session.venv_tool("coverage").as_path())
        .arg("report");
    let log = session.run(&phase)?;
    let text = log.read_lossy()?;
    info!(
        "Coverage:\n{}",
        session.redactor().redact(&text, CONSOLE_PLACEHOLDER)
    );
    Ok(())
}
