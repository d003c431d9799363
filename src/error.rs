//! Error types for the sandbox/container state layer.

use std::path::PathBuf;
use std::sync::Arc;

use crate::sandbox::Sandbox;

/// Result type alias for state-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tracking or recovering sandboxes and containers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Recovery Errors
    // =========================================================================
    /// The persisted record of an entity is unparseable or incomplete.
    #[error("malformed persisted state for '{id}': {reason}")]
    MalformedPersistedState { id: String, reason: String },

    /// The container was created by a different container manager.
    #[error("container '{id}' is managed by '{manager}', skipping")]
    ForeignContainer { id: String, manager: String },

    /// The container's owning sandbox is not registered.
    #[error("could not get sandbox '{sandbox}' for container '{id}', skipping")]
    OrphanContainer { id: String, sandbox: String },

    // =========================================================================
    // Index Errors
    // =========================================================================
    /// Name is already reserved by a different identifier.
    #[error("name '{name}' is reserved for '{holder}', cannot reserve it for '{id}'")]
    NameConflict {
        name: String,
        id: String,
        holder: String,
    },

    /// Lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// More than one stored identifier shares the given prefix.
    #[error("multiple IDs found with provided prefix: {0}")]
    AmbiguousPrefix(String),

    /// Identifier is already present in the index.
    #[error("ID already exists: {0}")]
    IdAlreadyExists(String),

    /// Identifier cannot be indexed or used in a path.
    #[error("invalid ID '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    // =========================================================================
    // Container Errors
    // =========================================================================
    /// The runtime does not know the container.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Operation requires a container backed by a real process.
    #[error("container '{0}' is spoofed and has no runtime payload")]
    SpoofedContainer(String),

    /// The sandbox already has an infra container.
    #[error("sandbox '{0}' already has an infra container")]
    InfraContainerAlreadySet(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Joining or releasing a kernel namespace failed.
    #[error("namespace {kind} at {path}: {reason}")]
    Namespace {
        kind: String,
        path: PathBuf,
        reason: String,
    },

    /// Security label reservation or release failed.
    #[error("security label '{label}': {reason}")]
    Label { label: String, reason: String },

    /// Storage refused to shut down because layers are still mounted.
    #[error("storage layer is still used by a container")]
    StorageInUse,

    /// Runtime status query failed.
    #[error("runtime '{runtime}' failed for container '{id}': {reason}")]
    Runtime {
        runtime: String,
        id: String,
        reason: String,
    },

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with the path that caused it.
    #[error("{context} {path}: {source}")]
    IoAt {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a [`Error::MalformedPersistedState`].
    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPersistedState {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for lookup misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ContainerNotFound(_))
    }
}

/// Failure of a sandbox recovery.
///
/// Carries the sandbox reference when recovery got far enough to build one,
/// so callers holding a partial reference can decide how to proceed. The
/// stored state has already been unwound by the time this is returned.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct LoadSandboxError {
    /// The sandbox as it was when recovery failed.
    pub sandbox: Option<Arc<Sandbox>>,
    /// The underlying failure.
    #[source]
    pub source: Error,
}

impl LoadSandboxError {
    pub(crate) fn new(sandbox: Option<Arc<Sandbox>>, source: Error) -> Self {
        Self { sandbox, source }
    }
}

impl From<Error> for LoadSandboxError {
    fn from(source: Error) -> Self {
        Self {
            sandbox: None,
            source,
        }
    }
}
