//! Redaction of sandbox-internal install paths.
//!
//! Tracebacks and coverage reports name files by where the package was
//! installed inside the run's virtualenv, e.g.
//! `/home/u/.onslaught/results/pkg/venv/lib/python3.11/site-packages/pkg/core.py`.
//! Those paths are meaningless once the sandbox is gone, so they are rewritten
//! to `{placeholder}/pkg/core.py`.

use std::borrow::Cow;

use anyhow::{Context, Result};
use regex::{NoExpand, Regex};

/// Placeholder used inside coverage HTML (an escaped ellipsis).
pub const HTML_PLACEHOLDER: &str = "&#x2026;";

/// Placeholder used in console summaries.
pub const CONSOLE_PLACEHOLDER: &str = "...";

/// Rewrites `.../site-packages/{package}` spans for one package.
#[derive(Debug, Clone)]
pub struct SitePackagesRedactor {
    package: String,
    pattern: Regex,
}

impl SitePackagesRedactor {
    pub fn new(package: &str) -> Result<Self> {
        let mut source = format!(
            r"/[A-Za-z0-9._/-]+/site-packages/{}",
            regex::escape(package)
        );
        // `pkg` must not match the `pkg` prefix of `pkg_extras`.
        if package
            .chars()
            .last()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
        {
            source.push_str(r"\b");
        }
        let pattern = Regex::new(&source)
            .with_context(|| format!("compile redaction pattern for {package}"))?;
        Ok(Self {
            package: package.to_string(),
            pattern,
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Replace every installed-package path in `text` with
    /// `{placeholder}/{package}`.
    ///
    /// Idempotent as long as `placeholder` does not itself contain a
    /// `site-packages/{package}` span.
    pub fn redact<'t>(&self, text: &'t str, placeholder: &str) -> Cow<'t, str> {
        let replacement = format!("{placeholder}/{}", self.package);
        self.pattern.replace_all(text, NoExpand(&replacement))
    }
}
