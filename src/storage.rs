//! # Storage Collaborator
//!
//! Resolves entity identifiers to their on-disk directories and reads the
//! persisted `config.json`.
//!
//! ## Storage Model
//!
//! Each sandbox or container owns two directories:
//!
//! ```text
//! <root>/containers/<id>/userdata/        persistent: config.json
//! <run_root>/containers/<id>/userdata/    volatile:   state.json, exit files
//! ```
//!
//! The persistent root survives reboots; the run root is usually tmpfs.
//!
//! ## Security Model
//!
//! Identifiers are validated with [`validate_container_id`] before they are
//! joined onto a root, so a crafted identifier cannot escape the store.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::constants::{CONTAINERS_DIR, USERDATA_DIR, validate_container_id};
use crate::error::{Error, Result};

/// On-disk layout the state layer depends on.
pub trait StorageDirectories: Send + Sync {
    /// Persistent directory of entity `id`.
    fn container_directory(&self, id: &str) -> Result<PathBuf>;

    /// Volatile run directory of entity `id`.
    fn container_run_directory(&self, id: &str) -> Result<PathBuf>;

    /// Reads `file` from the persistent directory of entity `id`.
    fn from_container_directory(&self, id: &str, file: &str) -> Result<Vec<u8>> {
        let path = self.container_directory(id)?.join(file);
        fs::read(&path).map_err(|e| Error::IoAt {
            context: "failed to read",
            path,
            source: e,
        })
    }

    /// Quiesces storage.
    ///
    /// # Errors
    ///
    /// [`Error::StorageInUse`] when layers are still mounted by containers
    /// and `force` is false.
    fn shutdown(&self, force: bool) -> Result<()>;
}

/// Directory-backed storage collaborator.
///
/// ## Thread Safety
///
/// `DirectoryStore` holds no mutable state; path resolution is pure and reads
/// go straight to the filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    run_root: PathBuf,
}

impl DirectoryStore {
    /// Creates a store at the given roots, creating them if needed.
    pub fn with_paths(root: impl Into<PathBuf>, run_root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let run_root = run_root.into();
        for dir in [&root, &run_root] {
            fs::create_dir_all(dir.join(CONTAINERS_DIR)).map_err(|e| Error::IoAt {
                context: "failed to initialize storage at",
                path: dir.clone(),
                source: e,
            })?;
        }

        info!(
            root = %root.display(),
            run_root = %run_root.display(),
            "Container storage initialized"
        );
        Ok(Self { root, run_root })
    }

    /// Persistent root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Volatile root.
    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    fn entity_dir(base: &Path, id: &str) -> Result<PathBuf> {
        validate_container_id(id).map_err(|reason| Error::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        })?;
        Ok(base.join(CONTAINERS_DIR).join(id).join(USERDATA_DIR))
    }
}

impl StorageDirectories for DirectoryStore {
    fn container_directory(&self, id: &str) -> Result<PathBuf> {
        Self::entity_dir(&self.root, id)
    }

    fn container_run_directory(&self, id: &str) -> Result<PathBuf> {
        Self::entity_dir(&self.run_root, id)
    }

    fn shutdown(&self, _force: bool) -> Result<()> {
        info!(root = %self.root.display(), "Container storage shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_layout() {
        let temp = TempDir::new().unwrap();
        let store =
            DirectoryStore::with_paths(temp.path().join("lib"), temp.path().join("run")).unwrap();

        let dir = store.container_directory("abc").unwrap();
        assert!(dir.ends_with("containers/abc/userdata"));
        assert!(dir.starts_with(temp.path().join("lib")));

        let run = store.container_run_directory("abc").unwrap();
        assert!(run.starts_with(temp.path().join("run")));
    }

    #[test]
    fn test_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let store =
            DirectoryStore::with_paths(temp.path().join("lib"), temp.path().join("run")).unwrap();
        assert!(matches!(
            store.container_directory("../../etc"),
            Err(Error::InvalidId { .. })
        ));
    }

    #[test]
    fn test_read_config() {
        let temp = TempDir::new().unwrap();
        let store =
            DirectoryStore::with_paths(temp.path().join("lib"), temp.path().join("run")).unwrap();
        let dir = store.container_directory("abc").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), b"{}").unwrap();

        assert_eq!(store.from_container_directory("abc", "config.json").unwrap(), b"{}");
        assert!(store.from_container_directory("def", "config.json").is_err());
    }
}
