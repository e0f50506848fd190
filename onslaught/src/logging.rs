//! Tracing setup for the onslaught CLI.
//!
//! # Separation of Concerns
//!
//! - **Console**: stderr, compact format, filtered by `--quiet`/`--debug`
//!   (or `RUST_LOG` when set).
//! - **Run log**: `<results>/logs/main.log`, everything at DEBUG and above,
//!   attached once the run has a results directory.
//! - **Step logs**: raw tool output in `logs/NN.name.log`, written by the
//!   child processes themselves and unaffected by either filter.
//!
//! Only the binary calls [`init`]. Library code receives the resulting
//! [`LogHandle`] explicitly and never installs a subscriber itself.

use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::io::path::SandboxPath;

type RunLogLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Console verbosity chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    #[default]
    Info,
    Debug,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        match (quiet, debug) {
            (true, _) => Verbosity::Quiet,
            (_, true) => Verbosity::Debug,
            _ => Verbosity::Info,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Per-run logging context.
///
/// Cheap to clone. A detached handle (tests, library embedding) accepts
/// every call and records nothing durable.
#[derive(Clone)]
pub struct LogHandle {
    run_log: Option<reload::Handle<Option<RunLogLayer>, Registry>>,
}

impl LogHandle {
    pub fn detached() -> Self {
        Self { run_log: None }
    }

    /// Start recording every DEBUG-and-above event of this process to
    /// `path`, replacing any previously attached run log.
    pub fn attach_main_log(&self, path: &SandboxPath) -> Result<()> {
        let Some(handle) = &self.run_log else {
            debug!(path = %path, "logging detached; not recording run log");
            return Ok(());
        };
        let file = path.create_file()?;
        let layer: RunLogLayer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .boxed();
        handle
            .reload(Some(layer))
            .with_context(|| format!("attach run log {path}"))?;
        debug!(path = %path, "created debug level log");
        Ok(())
    }
}

/// Install the process-wide subscriber and return the handle used to attach
/// the run log later.
///
/// `RUST_LOG`, when set, replaces the console level chosen by `verbosity`.
pub fn init(verbosity: Verbosity) -> Result<LogHandle> {
    let (run_log, handle) = reload::Layer::new(None::<RunLogLayer>);
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    tracing_subscriber::registry()
        .with(run_log.with_filter(LevelFilter::DEBUG))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_filter(console_filter),
        )
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LogHandle {
        run_log: Some(handle),
    })
}
