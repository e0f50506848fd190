//! Toolchain configuration (TOML).
//!
//! Names the external collaborators each phase invokes. Every field has a
//! default, so an empty file (or no file at all) gives the stock toolchain.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::path::normalize_lexically;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Host interpreter used to ask the target's `setup.py` for its name.
    pub python: String,

    /// Virtualenv provisioner; the venv directory is appended.
    pub virtualenv: Vec<String>,

    /// Style checker; the target directory is appended.
    pub flake8: Vec<String>,

    /// Test runner executable inside the venv's `bin/`.
    pub test_runner: String,

    /// Installer specifiers for the test tooling, installed in order.
    pub test_dependencies: Vec<String>,

    /// Optional pip cache shared across runs.
    pub pip_cache_dir: Option<PathBuf>,

    /// Build-log validator; the sdist log path is appended. Defaults to the
    /// `onslaught-check-sdist-log` binary installed next to `onslaught`.
    pub check_sdist_log: Option<Vec<String>>,

    /// Kill any step still running after this many seconds. Unset means wait
    /// forever.
    pub phase_timeout_secs: Option<u64>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            virtualenv: vec!["virtualenv".to_string()],
            flake8: vec!["flake8".to_string()],
            test_runner: "trial".to_string(),
            test_dependencies: vec![
                // trial ships with twisted
                "twisted >= 14.0".to_string(),
                "coverage == 4.0.3".to_string(),
            ],
            pip_cache_dir: None,
            check_sdist_log: None,
            phase_timeout_secs: None,
        }
    }
}

impl ToolchainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must be non-empty"));
        }
        if is_blank_command(&self.virtualenv) {
            return Err(anyhow!("virtualenv must be a non-empty array"));
        }
        if is_blank_command(&self.flake8) {
            return Err(anyhow!("flake8 must be a non-empty array"));
        }
        if self.test_runner.trim().is_empty() || self.test_runner.contains('/') {
            return Err(anyhow!("test_runner must be a bare executable name"));
        }
        if let Some(command) = &self.check_sdist_log
            && is_blank_command(command)
        {
            return Err(anyhow!("check_sdist_log must be a non-empty array when set"));
        }
        if self.phase_timeout_secs == Some(0) {
            return Err(anyhow!("phase_timeout_secs must be > 0 when set"));
        }
        Ok(())
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    /// Anchor relative paths at `base`. Bare program names such as `flake8`
    /// are left alone for `PATH` lookup; anything with a directory part is
    /// joined to `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        resolve_program(&mut self.python, base);
        for command in [&mut self.virtualenv, &mut self.flake8] {
            if let Some(program) = command.first_mut() {
                resolve_program(program, base);
            }
        }
        if let Some(program) = self
            .check_sdist_log
            .as_mut()
            .and_then(|command| command.first_mut())
        {
            resolve_program(program, base);
        }
        if let Some(dir) = &mut self.pip_cache_dir
            && dir.is_relative()
        {
            *dir = normalize_lexically(&base.join(&*dir));
        }
    }
}

fn resolve_program(program: &mut String, base: &Path) {
    let path = Path::new(program.as_str());
    if path.is_absolute() || path.components().count() < 2 {
        return;
    }
    let resolved = normalize_lexically(&base.join(path));
    *program = resolved.to_string_lossy().into_owned();
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file, or the defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<ToolchainConfig> {
    let Some(path) = path else {
        let cfg = ToolchainConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: ToolchainConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    // Steps run from inside the results directory, so relative paths are
    // taken from the config file's location instead.
    let absolute = std::path::absolute(path)
        .with_context(|| format!("resolve absolute path for {}", path.display()))?;
    if let Some(base) = absolute.parent() {
        cfg.resolve_relative_to(base);
    }
    Ok(cfg)
}

/// Write config to disk as pretty TOML.
pub fn write_config(path: &Path, cfg: &ToolchainConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
