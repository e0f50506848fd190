//! Revert side effects left in a directory tree.
//!
//! Packaging tools like to drop metadata (`*.egg-info`, `build/`, caches)
//! straight into the project they are pointed at. A [`CleanupSession`]
//! snapshots the tree on entry and, on exit, deletes everything that was not
//! in the snapshot, so the caller's tree ends up as it was found.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::path::SandboxPath;

/// Manifest of a directory tree, swept on [`finish`](Self::finish) or drop.
#[derive(Debug)]
pub struct CleanupSession {
    target: SandboxPath,
    manifest: HashSet<SandboxPath>,
    finished: bool,
}

impl CleanupSession {
    /// Snapshot every path under `target`.
    pub fn enter(target: &SandboxPath) -> Result<Self> {
        let manifest: HashSet<SandboxPath> = target
            .walk()
            .with_context(|| format!("snapshot {target}"))?
            .into_iter()
            .collect();
        debug!(target = %target, entries = manifest.len(), "cleanup manifest captured");
        Ok(Self {
            target: target.clone(),
            manifest,
            finished: false,
        })
    }

    pub fn target(&self) -> &SandboxPath {
        &self.target
    }

    /// Remove everything created since [`enter`](Self::enter) and return the
    /// removed top-level paths.
    ///
    /// Never fails: paths that disappear underneath the sweep count as
    /// removed, and other errors are logged so they cannot mask the outcome of
    /// the guarded work.
    pub fn finish(mut self) -> Vec<SandboxPath> {
        self.finished = true;
        self.sweep()
    }

    fn sweep(&self) -> Vec<SandboxPath> {
        debug!(target = %self.target, "cleaning up anything created during session");
        let current = match self.target.walk() {
            Ok(paths) => paths,
            Err(err) => {
                warn!(target = %self.target, err = %format!("{err:#}"), "cleanup walk failed");
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        // Walk order is parents first, so children of a removed directory are
        // already gone when reached and fail the `exists` check.
        for path in current {
            if self.manifest.contains(&path) || !path.exists() {
                continue;
            }
            match path.remove_recursive() {
                Ok(()) => {
                    debug!(path = %path, "removed session artifact");
                    removed.push(path);
                }
                Err(err) => {
                    warn!(path = %path, err = %format!("{err:#}"), "failed to remove session artifact");
                }
            }
        }
        removed
    }
}

impl Drop for CleanupSession {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.sweep();
        }
    }
}

/// Run `work` with a cleanup session guarding `target`. The sweep runs
/// whether `work` returns an error or panics.
pub fn with_cleanup<T>(target: &SandboxPath, work: impl FnOnce(&SandboxPath) -> T) -> Result<T> {
    let session = CleanupSession::enter(target)?;
    let result = work(session.target());
    let removed = session.finish();
    if !removed.is_empty() {
        debug!(target = %target, count = removed.len(), "reverted changes to target tree");
    }
    Ok(result)
}
