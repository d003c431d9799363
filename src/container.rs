//! Container entity.
//!
//! A [`Container`] is either a full container backed by a process, or a
//! spoofed placeholder standing in for the infra container of a sandbox that
//! was created without one. Spoofed containers carry identity, labels and
//! timestamps only; accessors for runtime-facing fields return `None` for
//! them and mutators fail with [`Error::SpoofedContainer`].
//!
//! The owning sandbox is referenced by identifier, never embedded.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::constants::STATE_FILE;
use crate::cri::{ContainerMetadata, ContainerVolume};
use crate::error::{Error, Result};
use crate::namespace::ManagedNamespace;
use crate::persist;
use crate::runtime::{ContainerState, ContainerStatus};
use crate::spec::Spec;

/// Fields every container has, spoofed or not.
#[derive(Debug, Clone, Default)]
pub struct ContainerIdentity {
    pub id: String,
    pub name: String,
    /// Owning sandbox identifier.
    pub sandbox: String,
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// Run directory; holds the state file.
    pub dir: PathBuf,
}

/// Runtime-facing fields of a full container.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    pub log_path: PathBuf,
    /// Every annotation of the persisted spec.
    pub annotations: HashMap<String, String>,
    /// Orchestrator-supplied annotations.
    pub kube_annotations: HashMap<String, String>,
    pub image: String,
    pub image_name: String,
    pub image_ref: String,
    pub metadata: Option<ContainerMetadata>,
    pub tty: bool,
    pub stdin: bool,
    pub stdin_once: bool,
    pub runtime_handler: String,
    /// Persistent directory; holds `config.json`.
    pub config_dir: PathBuf,
    pub stop_signal: String,
    pub mount_point: String,
    pub seccomp_profile_path: String,
    pub volumes: Vec<ContainerVolume>,
}

#[derive(Debug)]
enum ContainerKind {
    Full {
        options: Box<ContainerOptions>,
        spec: RwLock<Arc<Spec>>,
    },
    Spoofed,
}

/// A tracked container.
#[derive(Debug)]
pub struct Container {
    identity: ContainerIdentity,
    kind: ContainerKind,
    state: RwLock<ContainerState>,
    created: AtomicBool,
    pid_namespace: Mutex<Option<ManagedNamespace>>,
}

impl Container {
    /// Creates a full container running `spec`.
    pub fn new(identity: ContainerIdentity, options: ContainerOptions, spec: Spec) -> Self {
        Self::build(
            identity,
            ContainerKind::Full {
                options: Box::new(options),
                spec: RwLock::new(Arc::new(spec)),
            },
        )
    }

    /// Creates a spoofed placeholder with no backing process.
    pub fn spoofed(identity: ContainerIdentity) -> Self {
        Self::build(identity, ContainerKind::Spoofed)
    }

    fn build(identity: ContainerIdentity, kind: ContainerKind) -> Self {
        let state = ContainerState::new(
            identity.id.clone(),
            identity.dir.to_string_lossy(),
            ContainerStatus::Created,
            identity.created_at,
        );
        Self {
            identity,
            kind,
            state: RwLock::new(state),
            created: AtomicBool::new(false),
            pid_namespace: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Owning sandbox identifier.
    pub fn sandbox(&self) -> &str {
        &self.identity.sandbox
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.identity.labels
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.identity.created_at
    }

    /// Run directory.
    pub fn dir(&self) -> &Path {
        &self.identity.dir
    }

    /// Path of the persisted state file.
    pub fn state_path(&self) -> PathBuf {
        self.identity.dir.join(STATE_FILE)
    }

    pub fn is_spoofed(&self) -> bool {
        matches!(self.kind, ContainerKind::Spoofed)
    }

    /// Runtime-facing fields, `None` for spoofed containers.
    pub fn options(&self) -> Option<&ContainerOptions> {
        match &self.kind {
            ContainerKind::Full { options, .. } => Some(options),
            ContainerKind::Spoofed => None,
        }
    }

    /// Snapshot of the process spec, `None` for spoofed containers.
    pub fn spec(&self) -> Option<Arc<Spec>> {
        match &self.kind {
            ContainerKind::Full { spec, .. } => {
                Some(Arc::clone(&spec.read().unwrap_or_else(|e| e.into_inner())))
            }
            ContainerKind::Spoofed => None,
        }
    }

    /// Replaces the process spec as a whole.
    pub fn set_spec(&self, new: Spec) -> Result<()> {
        match &self.kind {
            ContainerKind::Full { spec, .. } => {
                *spec.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(new);
                Ok(())
            }
            ContainerKind::Spoofed => Err(Error::SpoofedContainer(self.id().to_string())),
        }
    }

    /// Mount point of the root filesystem.
    pub fn mount_point(&self) -> Option<&str> {
        self.options().map(|o| o.mount_point.as_str())
    }

    /// Runtime handler, `""` for spoofed containers.
    pub fn runtime_handler(&self) -> &str {
        self.options()
            .map(|o| o.runtime_handler.as_str())
            .unwrap_or_default()
    }

    /// Declared volumes.
    pub fn volumes(&self) -> &[ContainerVolume] {
        self.options().map(|o| o.volumes.as_slice()).unwrap_or_default()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ContainerState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies `f` to the state under its lock.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut ContainerState) -> R) -> R {
        f(&mut self.state.write().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replaces the in-memory state with the persisted one.
    ///
    /// A spoofed container with no state file keeps its in-memory state.
    pub fn from_disk(&self) -> Result<()> {
        let path = self.state_path();
        if self.is_spoofed() && !path.exists() {
            debug!(id = %self.id(), "No persisted state for spoofed container");
            return Ok(());
        }
        let persisted: ContainerState = persist::read_json(&path)?;
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = persisted;
        Ok(())
    }

    /// Marks creation as complete.
    pub fn set_created(&self) {
        self.created.store(true, Ordering::SeqCst);
    }

    /// Returns true once creation (or recovery) completed.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    /// Records a PID namespace owned by this container alone.
    pub fn set_pid_namespace(&self, ns: ManagedNamespace) -> Result<()> {
        if self.is_spoofed() {
            return Err(Error::SpoofedContainer(self.id().to_string()));
        }
        *self.pid_namespace.lock().unwrap_or_else(|e| e.into_inner()) = Some(ns);
        Ok(())
    }

    /// Takes the container-level PID namespace, if any.
    pub fn take_pid_namespace(&self) -> Option<ManagedNamespace> {
        self.pid_namespace
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
