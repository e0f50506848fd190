//! Package identity: the distribution name the target declares for itself.

use std::fmt;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

use super::path::SandboxPath;

/// Validated package name. Computed once per run and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity(String);

impl PackageIdentity {
    /// Parse the raw output of a name query.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            bail!("package name query printed nothing");
        }
        if name.chars().any(|ch| ch.is_whitespace() || ch == '/' || ch == '\\') {
            bail!("unparseable package name {name:?}");
        }
        if matches!(name, "." | "..") {
            bail!("unparseable package name {name:?}");
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asks a target project for its name. Treated as opaque: any failure is
/// fatal to the run.
pub trait IdentityProbe {
    fn package_name(&self, target: &SandboxPath) -> Result<PackageIdentity>;
}

/// Runs `{python} setup.py --name` inside the target.
#[derive(Debug, Clone)]
pub struct SetupPyProbe {
    python: String,
}

impl SetupPyProbe {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl IdentityProbe for SetupPyProbe {
    #[instrument(skip_all, fields(target = %target))]
    fn package_name(&self, target: &SandboxPath) -> Result<PackageIdentity> {
        let setup = target.join("setup.py");
        let output = Command::new(&self.python)
            .arg(setup.as_path())
            .arg("--name")
            .current_dir(target.as_path())
            .output()
            .with_context(|| format!("run {} {setup} --name", self.python))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{setup} --name failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }
        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("{setup} --name printed invalid UTF-8"))?;
        let identity =
            PackageIdentity::parse(&stdout).with_context(|| format!("parse {setup} --name"))?;
        debug!(package = %identity, "derived package identity");
        Ok(identity)
    }
}
