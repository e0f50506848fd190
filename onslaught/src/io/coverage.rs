//! Portable coverage report tree.

use anyhow::{Context, Result};
use tracing::debug;

use super::path::SandboxPath;
use crate::core::redact::SitePackagesRedactor;

/// Copy the raw HTML coverage report at `raw` to `nice`, redacting install
/// paths in every `.html` file (at any depth) to `{placeholder}/{package}`.
/// Other files are copied byte for byte.
pub fn simplify_coverage_tree(
    raw: &SandboxPath,
    nice: &SandboxPath,
    redactor: &SitePackagesRedactor,
    placeholder: &str,
) -> Result<()> {
    nice.ensure_is_directory()?;
    for src in raw
        .list_children()
        .with_context(|| format!("list coverage report {raw}"))?
    {
        let dst = nice.join(src.basename());
        if src.is_dir() {
            simplify_coverage_tree(&src, &dst, redactor, placeholder)?;
        } else if src.basename().ends_with(".html") {
            debug!(src = %src, dst = %dst, "tidying paths");
            let html = src.read_lossy()?;
            dst.write(redactor.redact(&html, placeholder).as_bytes())?;
        } else {
            src.copy_file(&dst)?;
        }
    }
    Ok(())
}
