//! Test-only fixtures: a throwaway Python project plus a fake toolchain.
//!
//! Every external tool a run invokes is replaced by a small shell script, so
//! the whole pipeline can be exercised without Python installed. The
//! scripts mimic only what the engine relies on: exit codes, log output,
//! and the files they leave behind.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::config::{ToolchainConfig, write_config};

/// Write an executable script.
pub fn write_script(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))
}

/// Knobs for [`FakeProject`].
#[derive(Debug, Clone)]
pub struct FakeProjectBuilder {
    package: String,
    flake8_fails: bool,
    sdist_artifacts: usize,
    sdist_warns: bool,
    tests_fail: bool,
    test_dependencies: Vec<String>,
    pip_cache_dir: Option<PathBuf>,
}

impl Default for FakeProjectBuilder {
    fn default() -> Self {
        Self {
            package: "fakepkg".to_string(),
            flake8_fails: false,
            sdist_artifacts: 1,
            sdist_warns: false,
            tests_fail: false,
            test_dependencies: Vec::new(),
            pip_cache_dir: None,
        }
    }
}

impl FakeProjectBuilder {
    pub fn package(mut self, name: &str) -> Self {
        self.package = name.to_string();
        self
    }

    pub fn flake8_fails(mut self) -> Self {
        self.flake8_fails = true;
        self
    }

    pub fn sdist_artifacts(mut self, count: usize) -> Self {
        self.sdist_artifacts = count;
        self
    }

    pub fn sdist_warns(mut self) -> Self {
        self.sdist_warns = true;
        self
    }

    pub fn tests_fail(mut self) -> Self {
        self.tests_fail = true;
        self
    }

    pub fn test_dependencies(mut self, specs: &[&str]) -> Self {
        self.test_dependencies = specs.iter().map(|spec| spec.to_string()).collect();
        self
    }

    pub fn pip_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pip_cache_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<FakeProject> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let root = temp.path();
        let pkg = &self.package;

        let target = root.join("project");
        fs::create_dir_all(target.join(pkg)).context("create project")?;
        fs::write(
            target.join("setup.py"),
            format!("from distutils.core import setup\nsetup(name={pkg:?}, packages=[{pkg:?}])\n"),
        )
        .context("write setup.py")?;
        fs::write(target.join(pkg).join("__init__.py"), "").context("write __init__.py")?;
        fs::write(target.join("README.txt"), "fake project\n").context("write README")?;

        let tools = root.join("tools");
        let venv_bin = tools.join("venv-bin");
        fs::create_dir_all(&venv_bin).context("create tools")?;

        let python = self.python_script();
        write_script(&tools.join("python"), &python)?;
        write_script(&venv_bin.join("python"), &python)?;
        write_script(&venv_bin.join("pip"), "#!/bin/sh\necho \"pip $*\"\n")?;
        write_script(&venv_bin.join("trial"), "#!/bin/sh\necho \"trial $*\"\n")?;
        write_script(&venv_bin.join("coverage"), &self.coverage_script())?;
        write_script(
            &tools.join("virtualenv"),
            &format!(
                "#!/bin/sh\nmkdir -p \"$1/bin\"\ncp \"{}\"/* \"$1/bin/\"\necho \"New python executable in $1/bin/python\"\n",
                venv_bin.display()
            ),
        )?;
        write_script(&tools.join("flake8"), &self.flake8_script())?;
        write_script(
            &tools.join("check-sdist-log"),
            "#!/bin/sh\nif grep -i '^warning:' \"$1\"; then\n  exit 1\nfi\nexit 0\n",
        )?;

        let tool = |name: &str| tools.join(name).to_string_lossy().into_owned();
        let config = ToolchainConfig {
            python: tool("python"),
            virtualenv: vec![tool("virtualenv")],
            flake8: vec![tool("flake8")],
            test_runner: "trial".to_string(),
            test_dependencies: self.test_dependencies.clone(),
            pip_cache_dir: self.pip_cache_dir.clone(),
            check_sdist_log: Some(vec![tool("check-sdist-log")]),
            phase_timeout_secs: None,
        };

        Ok(FakeProject {
            temp,
            package: self.package,
            config,
        })
    }

    // Answers `setup.py --name` and `setup.py sdist --dist-dir D`.
    fn python_script(&self) -> String {
        let pkg = &self.package;
        let warning = if self.sdist_warns {
            "echo 'warning: sdist: standard file not found: should have one of README, README.rst'"
        } else {
            ":"
        };
        format!(
            r#"#!/bin/sh
case "$2" in
--name)
  echo {pkg}
  ;;
sdist)
  dist="$4"
  mkdir -p "$dist" {pkg}.egg-info
  echo "running sdist"
  {warning}
  i=0
  while [ "$i" -lt {count} ]; do
    i=$((i + 1))
    : > "$dist/{pkg}-0.$i.tar.gz"
  done
  ;;
*)
  echo "unexpected arguments: $*" >&2
  exit 2
  ;;
esac
"#,
            count = self.sdist_artifacts,
        )
    }

    // Reports paths under the venv's site-packages, as real coverage does
    // for an installed package.
    fn coverage_script(&self) -> String {
        let pkg = &self.package;
        let tests_exit = u8::from(self.tests_fail);
        format!(
            r#"#!/bin/sh
venv=$(cd "$(dirname "$0")/.." && pwd)
site="$venv/lib/python3.11/site-packages/{pkg}"
case "$1" in
run)
  echo "coverage $*"
  echo "  File \"$site/test/test_core.py\", line 7, in test_it"
  : > .coverage
  exit {tests_exit}
  ;;
html)
  out="$3"
  mkdir -p "$out/sub"
  echo "<a href=\"sub/page.html\">$site/__init__.py</a>" > "$out/index.html"
  echo "<h1>$site/core.py</h1>" > "$out/sub/page.html"
  echo "body {{ color: black; }}" > "$out/style.css"
  ;;
report)
  echo "Name Stmts Miss Cover"
  echo "$site/__init__.py 1 0 100%"
  ;;
esac
"#
        )
    }

    // Leaves a cache directory in the checked tree, like the real tool.
    fn flake8_script(&self) -> String {
        let verdict = if self.flake8_fails {
            format!(
                "echo \"$1/{}/__init__.py:1:1: F401 'os' imported but unused\"\nexit 1",
                self.package
            )
        } else {
            "exit 0".to_string()
        };
        format!("#!/bin/sh\nmkdir -p \"$1/.flake8-cache\"\necho checked > \"$1/.flake8-cache/stamp\"\n{verdict}\n")
    }
}

/// A project directory and a toolchain config pointing at fake tools.
#[derive(Debug)]
pub struct FakeProject {
    temp: TempDir,
    package: String,
    config: ToolchainConfig,
}

impl FakeProject {
    pub fn builder() -> FakeProjectBuilder {
        FakeProjectBuilder::default()
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// The project a run is pointed at.
    pub fn target(&self) -> PathBuf {
        self.root().join("project")
    }

    /// Suggested results directory, outside the target.
    pub fn results(&self) -> PathBuf {
        self.root().join("results")
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Write `config` as TOML next to the project and return its path.
    pub fn write_config_file(&self, config: &ToolchainConfig) -> Result<PathBuf> {
        let path = self.root().join("onslaught.toml");
        write_config(&path, config)?;
        Ok(path)
    }
}
