//! Ephemeral per-job workspace directories.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Prefix for workspace directory names.
const WORKSPACE_PREFIX: &str = "precise-indexer-";

/// A fresh directory owned by one handler invocation.
///
/// The directory is removed when the workspace is dropped. Removal failures
/// are logged and otherwise ignored.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    dir: Option<tempfile::TempDir>,
}

impl Workspace {
    /// Creates a new directory under `root`, or under the system temp
    /// directory when `root` is `None`.
    pub fn create(root: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "Created workspace");
        Ok(Self {
            path,
            dir: Some(dir),
        })
    }

    /// Path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now, returning any error.
    pub fn close(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(path = %self.path.display(), "Removed workspace"),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove workspace"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(Some(root.path())).unwrap();
        let path = workspace.path().to_path_buf();
        std::fs::write(path.join("file.txt"), "data").unwrap();
        assert!(path.is_dir());

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_close() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(Some(root.path())).unwrap();
        let path = workspace.path().to_path_buf();

        workspace.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_are_distinct() {
        let root = TempDir::new().unwrap();
        let a = Workspace::create(Some(root.path())).unwrap();
        let b = Workspace::create(Some(root.path())).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX)));
    }

    #[test]
    fn test_missing_root_fails() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("does-not-exist");
        assert!(Workspace::create(Some(&missing)).is_err());
    }
}
