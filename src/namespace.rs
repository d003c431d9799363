//! Namespace collaborator - rejoining existing kernel namespaces.
//!
//! Pods pin their shared namespaces (network, IPC, UTS, user) to files such
//! as `/run/magikcri/ns/<pod>-net` at creation time. After a restart the state
//! layer reattaches to those pinned namespaces; it never creates new ones.
//!
//! Joining means holding a reference to the pinned namespace so it stays
//! valid for as long as the sandbox is tracked. Releasing drops that
//! reference.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};
use crate::spec::NamespaceType;

/// Filesystem magic of `nsfs`, the filesystem backing namespace files.
#[cfg(target_os = "linux")]
const NSFS_MAGIC: i64 = 0x6e73_6673;

/// A namespace joined on behalf of a sandbox or container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedNamespace {
    /// Namespace kind.
    pub kind: NamespaceType,
    /// Pinned path the namespace was joined through.
    pub path: PathBuf,
}

impl ManagedNamespace {
    pub fn new(kind: NamespaceType, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Joins and releases existing namespaces.
pub trait NamespaceManager: Send + Sync {
    /// Joins the existing namespace of `kind` pinned at `path`.
    fn join(&self, kind: NamespaceType, path: &Path) -> Result<ManagedNamespace>;

    /// Releases a namespace previously returned by [`NamespaceManager::join`].
    fn release(&self, ns: &ManagedNamespace) -> Result<()>;
}

/// Namespace manager holding an open descriptor per joined namespace file.
///
/// Descriptors are reference counted per path, so two entities joining the
/// same pinned namespace each need their own release.
#[derive(Debug, Default)]
pub struct FileNamespaceManager {
    held: Mutex<HashMap<PathBuf, (File, usize)>>,
}

impl FileNamespaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct namespace files currently held.
    pub fn held(&self) -> usize {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(target_os = "linux")]
    fn verify_nsfs(file: &File, kind: NamespaceType, path: &Path) -> Result<()> {
        use std::os::fd::AsRawFd;

        // SAFETY: statfs is plain old data; all-zero is a valid value.
        let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid for the lifetime of `file`; stat is a valid out pointer.
        let ret = unsafe { libc::fstatfs(file.as_raw_fd(), &mut stat) };
        if ret != 0 {
            return Err(Error::Namespace {
                kind: kind.to_string(),
                path: path.to_path_buf(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        if stat.f_type as i64 != NSFS_MAGIC {
            return Err(Error::Namespace {
                kind: kind.to_string(),
                path: path.to_path_buf(),
                reason: "not a namespace file".to_string(),
            });
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn verify_nsfs(_file: &File, kind: NamespaceType, path: &Path) -> Result<()> {
        Err(Error::Namespace {
            kind: kind.to_string(),
            path: path.to_path_buf(),
            reason: "namespaces require Linux".to_string(),
        })
    }
}

impl NamespaceManager for FileNamespaceManager {
    fn join(&self, kind: NamespaceType, path: &Path) -> Result<ManagedNamespace> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, refs)) = held.get_mut(path) {
            *refs += 1;
            return Ok(ManagedNamespace::new(kind, path));
        }

        let file = File::open(path).map_err(|e| Error::Namespace {
            kind: kind.to_string(),
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::verify_nsfs(&file, kind, path)?;

        debug!(kind = %kind, path = %path.display(), "Joined namespace");
        held.insert(path.to_path_buf(), (file, 1));
        Ok(ManagedNamespace::new(kind, path))
    }

    fn release(&self, ns: &ManagedNamespace) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let Some((_, refs)) = held.get_mut(&ns.path) else {
            return Err(Error::Namespace {
                kind: ns.kind.to_string(),
                path: ns.path.clone(),
                reason: "namespace is not held".to_string(),
            });
        };
        *refs -= 1;
        if *refs == 0 {
            held.remove(&ns.path);
            debug!(kind = %ns.kind, path = %ns.path.display(), "Released namespace");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_missing_path_fails() {
        let manager = FileNamespaceManager::new();
        let err = manager
            .join(NamespaceType::Network, Path::new("/nonexistent/ns/net"))
            .unwrap_err();
        assert!(matches!(err, Error::Namespace { .. }));
        assert_eq!(manager.held(), 0);
    }

    #[test]
    fn test_join_regular_file_fails() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let manager = FileNamespaceManager::new();
        assert!(manager.join(NamespaceType::Ipc, temp.path()).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_join_and_release_proc_namespace() {
        let manager = FileNamespaceManager::new();
        let path = Path::new("/proc/self/ns/uts");
        if !path.exists() {
            return;
        }
        let ns = manager.join(NamespaceType::Uts, path).unwrap();
        let again = manager.join(NamespaceType::Uts, path).unwrap();
        assert_eq!(manager.held(), 1);

        manager.release(&ns).unwrap();
        assert_eq!(manager.held(), 1);
        manager.release(&again).unwrap();
        assert_eq!(manager.held(), 0);
        assert!(manager.release(&ns).is_err());
    }
}
