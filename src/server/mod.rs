//! # Container Server
//!
//! Owns every piece of node-local state about sandboxes and containers and
//! exposes the operations orchestration-facing callers use on it.
//!
//! ## State
//!
//! ```text
//! ┌──────────────────────────── ContainerServer ────────────────────────────┐
//! │  pod_name_index  (Registrar)      ctr_name_index  (Registrar)          │
//! │  pod_id_index    (TruncIndex)     ctr_id_index    (TruncIndex)         │
//! │  sandboxes       (SandboxStore)                                        │
//! │  containers      (ContainerStore) infra_containers (ContainerStore)    │
//! │  levels          (ProcessLevels, the only facade-level lock)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every index and store is internally synchronized; no caller-side locking
//! is needed. Platform collaborators (storage, runtime, namespaces, labels,
//! level pool, stats) are injected through [`Collaborators`].
//!
//! Recovery of persisted entities lives in [`recover`].

pub mod recover;

use chrono::Utc;
use std::fs;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::config::ServerConfig;
use crate::constants::STATE_FILE_MODE;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::namespace::{FileNamespaceManager, NamespaceManager};
use crate::persist;
use crate::registrar::Registrar;
use crate::runtime::ContainerRuntime;
use crate::sandbox::Sandbox;
use crate::security::{
    LabelReserver, LevelPool, NoopLabels, NoopLevelPool, ProcessLevels, label_level,
};
use crate::spec::LinuxResources;
use crate::stats::{NoopStats, StatsCollector};
use crate::storage::{DirectoryStore, StorageDirectories};
use crate::store::{ContainerStore, SandboxStore};
use crate::truncindex::TruncIndex;

pub use recover::RestoreReport;

// =============================================================================
// Collaborators
// =============================================================================

/// Platform services the server depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageDirectories>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub namespaces: Arc<dyn NamespaceManager>,
    pub labels: Arc<dyn LabelReserver>,
    pub levels: Arc<dyn LevelPool>,
    pub stats: Arc<dyn StatsCollector>,
}

impl Collaborators {
    /// Storage and runtime as given; file-backed namespaces; no label, level
    /// or statistics backend.
    pub fn new(storage: Arc<dyn StorageDirectories>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            storage,
            runtime,
            namespaces: Arc::new(FileNamespaceManager::new()),
            labels: Arc::new(NoopLabels),
            levels: Arc::new(NoopLevelPool),
            stats: Arc::new(NoopStats),
        }
    }

    pub fn with_namespaces(mut self, namespaces: Arc<dyn NamespaceManager>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelReserver>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_levels(mut self, levels: Arc<dyn LevelPool>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsCollector>) -> Self {
        self.stats = stats;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("runtime", &self.runtime.name())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Node-local registry of sandboxes and containers.
#[derive(Debug)]
pub struct ContainerServer {
    config: ServerConfig,
    collab: Collaborators,
    ctr_name_index: Registrar,
    ctr_id_index: TruncIndex,
    pod_name_index: Registrar,
    pod_id_index: TruncIndex,
    containers: ContainerStore,
    infra_containers: ContainerStore,
    sandboxes: SandboxStore,
    levels: ProcessLevels,
}

impl ContainerServer {
    /// Creates an empty server.
    pub fn new(config: ServerConfig, collab: Collaborators) -> Self {
        Self {
            config,
            collab,
            ctr_name_index: Registrar::new(),
            ctr_id_index: TruncIndex::default(),
            pod_name_index: Registrar::new(),
            pod_id_index: TruncIndex::default(),
            containers: ContainerStore::new(),
            infra_containers: ContainerStore::new(),
            sandboxes: SandboxStore::new(),
            levels: ProcessLevels::new(),
        }
    }

    /// Creates a server backed by a [`DirectoryStore`] at the configured roots.
    pub fn open(config: ServerConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let storage = DirectoryStore::with_paths(&config.root, &config.run_root)?;
        Ok(Self::new(
            config,
            Collaborators::new(Arc::new(storage), runtime),
        ))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Prefix index of container identifiers.
    pub fn ctr_id_index(&self) -> &TruncIndex {
        &self.ctr_id_index
    }

    /// Prefix index of sandbox identifiers.
    pub fn pod_id_index(&self) -> &TruncIndex {
        &self.pod_id_index
    }

    /// Sandboxes using isolation level `level`.
    pub fn process_level_users(&self, level: &str) -> usize {
        self.levels.count(level)
    }

    // =========================================================================
    // Names
    // =========================================================================

    /// Holds `name` for container `id`.
    pub fn reserve_container_name(&self, id: &str, name: &str) -> Result<()> {
        self.ctr_name_index.reserve(name, id).inspect_err(|e| {
            warn!(name, id, error = %e, "Error reserving container name");
        })
    }

    pub fn release_container_name(&self, name: &str) {
        self.ctr_name_index.release(name);
    }

    pub fn container_id_for_name(&self, name: &str) -> Result<String> {
        self.ctr_name_index.get(name)
    }

    /// Holds `name` for sandbox `id`.
    pub fn reserve_pod_name(&self, id: &str, name: &str) -> Result<()> {
        self.pod_name_index.reserve(name, id).inspect_err(|e| {
            warn!(name, id, error = %e, "Error reserving pod name");
        })
    }

    pub fn release_pod_name(&self, name: &str) {
        self.pod_name_index.release(name);
    }

    pub fn pod_id_for_name(&self, name: &str) -> Result<String> {
        self.pod_name_index.get(name)
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Stores `ctr` and attaches it to its sandbox.
    ///
    /// Does nothing if the owning sandbox is not registered.
    pub fn add_container(&self, ctr: Arc<Container>) {
        let Some(sb) = self.sandboxes.get(ctr.sandbox()) else {
            debug!(id = %ctr.id(), sandbox = %ctr.sandbox(), "Sandbox missing, not adding container");
            return;
        };
        let id = ctr.id().to_string();
        sb.add_container(&id);
        self.containers.add(&id, ctr);
    }

    pub fn get_container(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.get(id)
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.containers.get(id).is_some()
    }

    /// Detaches `ctr` from its sandbox and forgets it.
    ///
    /// A container-level PID namespace is released; failure to do so is
    /// logged and does not stop the removal.
    pub fn remove_container(&self, ctr: &Container) {
        let Some(sb) = self.sandboxes.get(ctr.sandbox()) else {
            return;
        };
        sb.remove_container(ctr.id());
        self.collab.stats.remove_stats_for_container(ctr.id());
        if let Some(ns) = ctr.take_pid_namespace()
            && let Err(e) = self.collab.namespaces.release(&ns)
        {
            error!(id = %ctr.id(), error = %e, "Failed to remove container PID namespace");
        }
        self.containers.delete(ctr.id());
    }

    /// Every stored container matching at least one filter.
    ///
    /// No filters returns every container.
    pub fn list_containers(&self, filters: &[&dyn Fn(&Container) -> bool]) -> Vec<Arc<Container>> {
        let containers = self.containers.list();
        if filters.is_empty() {
            return containers;
        }
        containers
            .into_iter()
            .filter(|ctr| filters.iter().any(|filter| filter(ctr)))
            .collect()
    }

    pub fn add_infra_container(&self, ctr: Arc<Container>) {
        let id = ctr.id().to_string();
        self.infra_containers.add(&id, ctr);
    }

    pub fn get_infra_container(&self, id: &str) -> Option<Arc<Container>> {
        self.infra_containers.get(id)
    }

    pub fn remove_infra_container(&self, id: &str) {
        self.infra_containers.delete(id);
    }

    /// Merges the fields present in `resources` into the container's spec and
    /// re-registers the container.
    pub fn update_container_linux_resources(
        &self,
        ctr: &Arc<Container>,
        resources: &LinuxResources,
    ) -> Result<()> {
        let current = ctr
            .spec()
            .ok_or_else(|| Error::SpoofedContainer(ctr.id().to_string()))?;
        let mut updated = (*current).clone();
        updated.merge_linux_resources(resources);
        ctr.set_spec(updated)?;
        self.containers.add(ctr.id(), Arc::clone(ctr));
        Ok(())
    }

    // =========================================================================
    // Sandboxes
    // =========================================================================

    /// Stores `sb` and counts it against its isolation level.
    pub fn add_sandbox(&self, sb: Arc<Sandbox>) -> Result<()> {
        self.sandboxes.add(sb.id(), Arc::clone(&sb));
        if let Some(level) = label_level(sb.process_label())
            && let Err(e) = self.levels.acquire(level, self.collab.levels.as_ref())
        {
            self.sandboxes.delete(sb.id());
            return Err(e);
        }
        Ok(())
    }

    pub fn get_sandbox(&self, id: &str) -> Option<Arc<Sandbox>> {
        self.sandboxes.get(id)
    }

    pub fn has_sandbox(&self, id: &str) -> bool {
        self.sandboxes.get(id).is_some()
    }

    /// Infra container of sandbox `id`.
    pub fn get_sandbox_container(&self, id: &str) -> Option<Arc<Container>> {
        self.sandboxes.get(id)?.infra_container()
    }

    pub fn list_sandboxes(&self) -> Vec<Arc<Sandbox>> {
        self.sandboxes.list()
    }

    /// Forgets sandbox `id` and releases what it holds.
    ///
    /// The isolation level goes back first; failing that, nothing else is
    /// touched. Namespace release is best-effort. Unknown ids are a no-op.
    pub fn remove_sandbox(&self, id: &str) -> Result<()> {
        let Some(sb) = self.sandboxes.get(id) else {
            return Ok(());
        };

        self.unregister_sandbox(&sb)?;

        if self
            .pod_name_index
            .get(sb.name())
            .is_ok_and(|holder| holder == id)
        {
            self.pod_name_index.release(sb.name());
        }
        if let Err(e) = self.pod_id_index.delete(id)
            && !e.is_not_found()
        {
            warn!(id, error = %e, "Could not delete pod ID");
        }

        self.collab.stats.remove_stats_for_sandbox(id);
        Ok(())
    }

    /// Reverses [`ContainerServer::add_sandbox`] and drops the sandbox's
    /// namespaces. Names and the id index are left alone.
    pub(crate) fn unregister_sandbox(&self, sb: &Sandbox) -> Result<()> {
        if let Some(level) = label_level(sb.process_label()) {
            self.levels.release(level, self.collab.levels.as_ref())?;
        }
        self.release_sandbox_namespaces(sb);
        self.sandboxes.delete(sb.id());
        Ok(())
    }

    fn release_sandbox_namespaces(&self, sb: &Sandbox) {
        for ns in sb.take_namespaces() {
            if let Err(e) = self.collab.namespaces.release(&ns) {
                warn!(
                    id = %sb.id(),
                    kind = %ns.kind,
                    path = %ns.path.display(),
                    error = %e,
                    "Failed to remove namespace"
                );
            }
        }
    }

    // =========================================================================
    // State persistence
    // =========================================================================

    /// Refreshes the container's state from the runtime.
    ///
    /// Spoofed containers have no process and are left alone. A container
    /// the runtime no longer knows is marked stopped.
    pub async fn update_container_status(&self, ctr: &Container) -> Result<()> {
        if ctr.is_spoofed() {
            return Ok(());
        }

        let timeout = self.config.runtime_status_timeout();
        let bundle = ctr.dir().to_string_lossy();
        let live = tokio::time::timeout(timeout, self.collab.runtime.status(ctr.id(), &bundle))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("status of container {}", ctr.id()),
                duration: timeout,
            })?;

        match live {
            Ok(live) => ctr.update_state(|state| state.reconcile(&live)),
            Err(Error::ContainerNotFound(_)) => {
                debug!(id = %ctr.id(), "Runtime no longer knows container, marking stopped");
                ctr.update_state(|state| state.mark_vanished(Utc::now()));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Reloads persisted state, then reconciles it with the runtime.
    #[instrument(skip(self, ctr), fields(id = %ctr.id()))]
    pub async fn container_state_from_disk(&self, ctr: &Container) -> Result<()> {
        ctr.from_disk()?;
        self.update_container_status(ctr).await
    }

    /// Refreshes state from the runtime when possible and persists it
    /// atomically.
    #[instrument(skip(self, ctr), fields(id = %ctr.id()))]
    pub async fn container_state_to_disk(&self, ctr: &Container) -> Result<()> {
        if let Err(e) = self.update_container_status(ctr).await {
            warn!(id = %ctr.id(), error = %e, "Error updating the container status");
        }

        let path = ctr.state_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::IoAt {
                context: "failed to create state directory",
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        persist::write_json_atomic(&path, STATE_FILE_MODE, &ctr.state())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Quiesces storage and statistics.
    ///
    /// Storage still in use by containers is not an error.
    pub fn shutdown(&self) -> Result<()> {
        match self.collab.storage.shutdown(false) {
            Ok(()) | Err(Error::StorageInUse) => {}
            Err(e) => return Err(e),
        }
        self.collab.stats.shutdown();
        Ok(())
    }
}
