//! Absolute, normalized filesystem locations.
//!
//! [`SandboxPath`] is an immutable value: joining never touches the disk, and
//! equality/hashing compare the normalized absolute path, so sets of paths
//! taken at different times can be diffed directly.

use std::env;
use std::fmt;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::core::path::normalize_lexically;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxPath(PathBuf);

impl SandboxPath {
    /// Resolve `path` against the current directory (if relative) and
    /// normalize it.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path)
            .with_context(|| format!("resolve absolute path for {}", path.display()))?;
        Ok(Self(normalize_lexically(&absolute)))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Child location. An absolute `part` replaces the whole path, as with
    /// [`Path::join`].
    pub fn join(&self, part: impl AsRef<Path>) -> Self {
        Self(normalize_lexically(&self.0.join(part)))
    }

    /// Final component, or an empty string for the filesystem root.
    pub fn basename(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|parent| Self(parent.to_path_buf()))
    }

    /// True if anything (file, directory, or dangling symlink) is here.
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.0).is_ok()
    }

    pub fn is_file(&self) -> bool {
        self.0.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    /// Create this directory and any missing parents. Existing directories
    /// are fine; an existing non-directory is an error.
    pub fn ensure_is_directory(&self) -> Result<()> {
        if self.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.0).with_context(|| format!("create directory {self}"))?;
        debug!(path = %self, "created directory");
        Ok(())
    }

    /// `rm -rf`: removes files, symlinks and directory trees. A missing path
    /// is not an error.
    pub fn remove_recursive(&self) -> Result<()> {
        let meta = match fs::symlink_metadata(&self.0) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err).with_context(|| format!("stat {self}")),
        };
        debug!(path = %self, "rm -rf");
        let result = if meta.is_dir() {
            fs::remove_dir_all(&self.0)
        } else {
            fs::remove_file(&self.0)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {self}")),
        }
    }

    /// Direct children, sorted by path.
    pub fn list_children(&self) -> Result<Vec<SandboxPath>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(&self.0).with_context(|| format!("read directory {self}"))? {
            let entry = entry.with_context(|| format!("read entry in {self}"))?;
            children.push(self.join(entry.file_name()));
        }
        children.sort();
        Ok(children)
    }

    /// Every descendant file and directory (not the root itself), parents
    /// before their children. Entries that vanish mid-walk are skipped, and a
    /// missing root yields an empty list.
    pub fn walk(&self) -> Result<Vec<SandboxPath>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.0)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            match entry {
                Ok(entry) => paths.push(SandboxPath(entry.into_path())),
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Err(anyhow!(err)).with_context(|| format!("walk {self}")),
            }
        }
        Ok(paths)
    }

    /// Switch the process working directory here until the guard drops.
    pub fn pushd(&self) -> Result<PushdGuard> {
        let previous = env::current_dir().context("read current directory")?;
        env::set_current_dir(&self.0).with_context(|| format!("chdir to {self}"))?;
        debug!(from = %previous.display(), to = %self, "pushd");
        Ok(PushdGuard { previous })
    }

    /// Recursively copy this directory to `dest`, which must not exist yet.
    /// Symlinks are followed, so the copy holds real files.
    pub fn copy_tree(&self, dest: &SandboxPath) -> Result<()> {
        if dest.exists() {
            bail!("copy destination {dest} already exists");
        }
        if !self.is_dir() {
            bail!("copy source {self} is not a directory");
        }
        debug!(src = %self, dest = %dest, "copying tree");
        dest.ensure_is_directory()?;
        for entry in WalkDir::new(&self.0).min_depth(1).follow_links(true) {
            let entry = entry.map_err(|err| anyhow!(err)).with_context(|| format!("walk {self}"))?;
            let relative = entry
                .path()
                .strip_prefix(&self.0)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                target.ensure_is_directory()?;
            } else {
                fs::copy(entry.path(), target.as_path()).with_context(|| {
                    format!("copy {} to {target}", entry.path().display())
                })?;
            }
        }
        Ok(())
    }

    pub fn copy_file(&self, dest: &SandboxPath) -> Result<()> {
        fs::copy(&self.0, &dest.0).with_context(|| format!("copy {self} to {dest}"))?;
        Ok(())
    }

    pub fn read_to_string(&self) -> Result<String> {
        fs::read_to_string(&self.0).with_context(|| format!("read {self}"))
    }

    /// Read as text, replacing invalid UTF-8. Tool output is not guaranteed
    /// to be valid UTF-8.
    pub fn read_lossy(&self) -> Result<String> {
        let bytes = fs::read(&self.0).with_context(|| format!("read {self}"))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write(&self, contents: impl AsRef<[u8]>) -> Result<()> {
        fs::write(&self.0, contents).with_context(|| format!("write {self}"))
    }

    /// Create (or truncate) the file for writing.
    pub fn create_file(&self) -> Result<File> {
        File::create(&self.0).with_context(|| format!("create {self}"))
    }
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|io| io.kind() == ErrorKind::NotFound)
}

impl fmt::Display for SandboxPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for SandboxPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Restores the previous working directory on drop, including during
/// unwinding and early returns.
#[must_use = "the previous directory is restored as soon as the guard drops"]
#[derive(Debug)]
pub struct PushdGuard {
    previous: PathBuf,
}

impl Drop for PushdGuard {
    fn drop(&mut self) {
        match env::set_current_dir(&self.previous) {
            Ok(()) => debug!(to = %self.previous.display(), "popd"),
            Err(err) => {
                error!(err = %err, to = %self.previous.display(), "failed to restore working directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Mutex, MutexGuard};

    // The working directory is process-global; pushd tests take turns.
    static CWD_LOCK: Mutex<()> = Mutex::new(());

    fn lock_cwd() -> MutexGuard<'static, ()> {
        CWD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tree(root: &Path) -> SandboxPath {
        let root = SandboxPath::new(root).expect("root");
        root.join("a/b").ensure_is_directory().expect("mkdir");
        root.join("a/b/file.txt").write("hello").expect("write");
        root.join("top.txt").write("top").expect("write");
        root
    }

    #[test]
    fn join_does_not_touch_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = SandboxPath::new(temp.path()).expect("root");
        let child = root.join("missing/child");
        assert!(!child.exists());
        assert_eq!(child.as_path(), temp.path().join("missing/child"));
    }

    #[test]
    fn equality_is_by_normalized_path() {
        let a = SandboxPath::new("/x/y/../z").expect("a");
        let b = SandboxPath::new("/x/./z").expect("b");
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn basename_and_parent() {
        let path = SandboxPath::new("/x/y/z.log").expect("path");
        assert_eq!(path.basename(), "z.log");
        assert_eq!(path.parent(), Some(SandboxPath::new("/x/y").expect("parent")));
    }

    #[test]
    fn ensure_is_directory_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = SandboxPath::new(temp.path()).expect("root").join("a/b/c");
        dir.ensure_is_directory().expect("first");
        dir.ensure_is_directory().expect("second");
        assert!(dir.is_dir());
    }

    #[test]
    fn ensure_is_directory_rejects_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = SandboxPath::new(temp.path()).expect("root").join("f");
        file.write("x").expect("write");
        assert!(file.ensure_is_directory().is_err());
    }

    #[test]
    fn remove_recursive_handles_trees_files_and_missing_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = tree(temp.path());
        root.join("top.txt").remove_recursive().expect("file");
        root.join("a").remove_recursive().expect("tree");
        root.join("a").remove_recursive().expect("missing");
        assert!(root.list_children().expect("list").is_empty());
    }

    #[test]
    fn list_children_is_not_recursive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = tree(temp.path());
        let names: Vec<String> = root
            .list_children()
            .expect("list")
            .iter()
            .map(SandboxPath::basename)
            .collect();
        assert_eq!(names, vec!["a", "top.txt"]);
    }

    #[test]
    fn walk_yields_every_descendant_parents_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = tree(temp.path());
        let walked = root.walk().expect("walk");
        assert_eq!(
            walked,
            vec![
                root.join("a"),
                root.join("a/b"),
                root.join("a/b/file.txt"),
                root.join("top.txt"),
            ]
        );
    }

    #[test]
    fn walk_of_missing_root_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = SandboxPath::new(temp.path()).expect("root").join("nope");
        assert!(missing.walk().expect("walk").is_empty());
    }

    #[test]
    fn copy_tree_preserves_structure_and_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = tree(&temp.path().join("src"));
        let dest = SandboxPath::new(temp.path()).expect("root").join("dest");
        src.copy_tree(&dest).expect("copy");

        assert_eq!(
            dest.join("a/b/file.txt").read_to_string().expect("read"),
            "hello"
        );
        assert_eq!(dest.join("top.txt").read_to_string().expect("read"), "top");
        assert_eq!(src.walk().expect("src").len(), dest.walk().expect("dest").len());
    }

    #[test]
    fn copy_tree_refuses_existing_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = tree(&temp.path().join("src"));
        let dest = SandboxPath::new(temp.path()).expect("root").join("dest");
        dest.ensure_is_directory().expect("mkdir");
        let err = src.copy_tree(&dest).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn read_lossy_tolerates_invalid_utf8() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = SandboxPath::new(temp.path()).expect("root").join("bin.log");
        file.write([b'o', b'k', 0xff, b'\n']).expect("write");
        assert!(file.read_to_string().is_err());
        assert_eq!(file.read_lossy().expect("lossy"), "ok\u{fffd}\n");
    }

    #[test]
    fn pushd_restores_previous_directory() {
        let _lock = lock_cwd();
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = SandboxPath::new(temp.path()).expect("root");
        let before = env::current_dir().expect("cwd");
        {
            let _guard = dest.pushd().expect("pushd");
            let inside = SandboxPath::new(env::current_dir().expect("cwd")).expect("inside");
            assert_eq!(
                inside.as_path().canonicalize().expect("canon"),
                dest.as_path().canonicalize().expect("canon")
            );
        }
        assert_eq!(env::current_dir().expect("cwd"), before);
    }

    #[test]
    fn pushd_restores_on_early_error_return() {
        fn failing_work(dest: &SandboxPath) -> Result<()> {
            let _guard = dest.pushd()?;
            bail!("boom")
        }

        let _lock = lock_cwd();
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = SandboxPath::new(temp.path()).expect("root");
        let before = env::current_dir().expect("cwd");
        assert!(failing_work(&dest).is_err());
        assert_eq!(env::current_dir().expect("cwd"), before);
    }
}
