//! Helpers for running child processes with their output captured to a log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How a logged child process ended.
#[derive(Debug, Clone, Copy)]
pub struct ProcessExit {
    pub status: ExitStatus,
    pub timed_out: bool,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run `cmd` with stdout and stderr both appended to a fresh file at
/// `log_path`, in the order the child writes them.
///
/// Blocks until the child exits. With `timeout` set, a child still running at
/// the deadline is killed and a note is appended to the log; without it, a
/// hung child blocks forever.
#[instrument(skip_all, fields(log = %log_path.display(), timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_to_log(
    mut cmd: Command,
    log_path: &Path,
    timeout: Option<Duration>,
) -> Result<ProcessExit> {
    let log = std::fs::File::create(log_path)
        .with_context(|| format!("create log {}", log_path.display()))?;
    let log_for_stderr = log
        .try_clone()
        .with_context(|| format!("clone log handle {}", log_path.display()))?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_for_stderr));

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };
    // Release our copies of the log handles; only the child holds them now.
    drop(cmd);

    let mut timed_out = false;
    let status = match timeout {
        None => child.wait().context("wait for command")?,
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                child.kill().context("kill command")?;
                let status = child.wait().context("wait command after kill")?;
                append_note(
                    log_path,
                    &format!("[onslaught: killed after {} seconds]", limit.as_secs()),
                )?;
                status
            }
        },
    };

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessExit { status, timed_out })
}

fn append_note(log_path: &Path, note: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log {}", log_path.display()))?;
    writeln!(file, "\n{note}").with_context(|| format!("append to log {}", log_path.display()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn merges_stdout_and_stderr_into_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("00.step.log");
        let exit = run_to_log(sh("echo out; echo err 1>&2; echo out2"), &log, None).expect("run");
        assert!(exit.success());
        let contents = std::fs::read_to_string(&log).expect("read");
        assert_eq!(contents, "out\nerr\nout2\n");
    }

    #[test]
    fn reports_nonzero_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("00.step.log");
        let exit = run_to_log(sh("echo nope; exit 3"), &log, None).expect("run");
        assert!(!exit.success());
        assert!(!exit.timed_out);
        assert_eq!(exit.status.code(), Some(3));
    }

    #[test]
    fn missing_program_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("00.step.log");
        let err = run_to_log(
            Command::new("/definitely/not/a/real/program"),
            &log,
            None,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn"));
    }

    #[test]
    fn kills_on_timeout_and_notes_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("00.step.log");
        let exit = run_to_log(
            sh("echo started; exec sleep 30"),
            &log,
            Some(Duration::from_millis(200)),
        )
        .expect("run");
        assert!(exit.timed_out);
        assert!(!exit.success());
        let contents = std::fs::read_to_string(&log).expect("read");
        assert!(contents.starts_with("started\n"));
        assert!(contents.contains("[onslaught: killed after 0 seconds]"));
    }
}
