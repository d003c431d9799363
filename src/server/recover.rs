//! # Recovery
//!
//! Rebuilds sandboxes and containers from their persisted `config.json`
//! after a restart.
//!
//! ## Protocol
//!
//! Sandbox recovery runs these steps in order:
//!
//! ```text
//!  1. read + decode config.json           (no side effects)
//!  2. reserve pod name                    undo: release name
//!  3. build sandbox
//!  4. register sandbox + isolation level  undo: remove sandbox
//!  5. reserve infra container name        undo: release name
//!  6. build infra container (full or spoofed)
//!  7. attach infra container, restore stopped flag
//!  8. join network/ipc/uts/user namespaces undo: release namespaces
//!  9. state from disk + runtime, write back
//! 10. mark created, reserve process label undo: release label
//! 11. index infra container, index pod    undo: unindex infra container
//! ```
//!
//! A failure at step k unwinds steps k-1..1 newest first through a
//! [`Rollback`]. Dropping the recovery future has the same effect.
//!
//! Containers are recovered the same way, after their sandbox. A container
//! whose ownership annotation names another manager is skipped untouched,
//! and one whose sandbox is not registered fails before anything is
//! reserved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::ContainerServer;
use crate::annotations::Annotations;
use crate::constants::{
    ANNOTATIONS, CGROUP_PARENT, CONFIG_FILE, CONTAINER_ID, CONTAINER_MANAGER, CONTAINER_NAME,
    CREATED, HOST_NETWORK, HOSTNAME, HOSTNAME_PATH, IMAGE, IMAGE_NAME, IMAGE_REF, KUBE_NAME,
    LABELS, LOG_PATH, METADATA, MOUNT_POINT, NAME, NAMESPACE, NAMESPACE_OPTIONS,
    POD_LINUX_OVERHEAD, POD_LINUX_RESOURCES, PORT_MAPPINGS, PRIVILEGED_RUNTIME, RESOLV_PATH,
    RUNTIME_HANDLER, SANDBOX_ID, SECCOMP_PROFILE_PATH, SHM_PATH, SPOOFED_CONTAINER, STDIN,
    STDIN_ONCE, STOP_SIGNAL, TTY, USERNS_MODE, VOLUMES,
};
use crate::container::{Container, ContainerIdentity, ContainerOptions};
use crate::cri::{ContainerMetadata, ContainerVolume, PodSandboxMetadata, PortMapping};
use crate::error::{Error, LoadSandboxError, Result};
use crate::rollback::Rollback;
use crate::sandbox::{Sandbox, SandboxInfo};
use crate::spec::{NamespaceType, Spec};

/// Namespaces a sandbox shares with its containers.
const SANDBOX_NAMESPACES: [NamespaceType; 4] = [
    NamespaceType::Network,
    NamespaceType::Ipc,
    NamespaceType::Uts,
    NamespaceType::User,
];

/// Outcome of [`ContainerServer::restore`].
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Sandboxes recovered.
    pub sandboxes: Vec<String>,
    /// Containers recovered.
    pub containers: Vec<String>,
    /// Containers skipped because another manager owns them.
    pub foreign: Vec<String>,
    /// Entities that failed recovery, with the reason.
    pub failed: Vec<(String, Error)>,
}

impl RestoreReport {
    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Decoded, side-effect-free view of a persisted sandbox.
struct SandboxRecord {
    spec: Spec,
    info: SandboxInfo,
    infra_id: String,
    infra_name: String,
    spoofed: bool,
    run_dir: PathBuf,
    config_dir: PathBuf,
    volumes: Vec<ContainerVolume>,
}

/// Decoded, side-effect-free view of a persisted container.
struct ContainerRecord {
    spec: Spec,
    identity: ContainerIdentity,
    options: ContainerOptions,
}

impl ContainerServer {
    // =========================================================================
    // Sandbox recovery
    // =========================================================================

    /// Rebuilds sandbox `id` and its infra container from disk.
    ///
    /// On failure every side effect is unwound; the error carries the sandbox
    /// if one was built.
    #[instrument(skip(self))]
    pub async fn load_sandbox(
        &self,
        id: &str,
    ) -> std::result::Result<Arc<Sandbox>, LoadSandboxError> {
        let mut built = None;
        match self.load_sandbox_steps(id, &mut built).await {
            Ok(sb) => {
                info!(id, name = %sb.name(), "Restored sandbox");
                Ok(sb)
            }
            Err(e) => Err(LoadSandboxError::new(built, e)),
        }
    }

    async fn load_sandbox_steps(
        &self,
        id: &str,
        built: &mut Option<Arc<Sandbox>>,
    ) -> Result<Arc<Sandbox>> {
        let record = self.read_sandbox_record(id)?;
        let mut rollback = Rollback::new();

        let pod_name = record.info.name.clone();
        // A name this id already held was not taken here and is kept.
        let held = self.pod_id_for_name(&pod_name).is_ok_and(|holder| holder == id);
        self.reserve_pod_name(id, &pod_name)?;
        if !held {
            rollback.push("reserve pod name", move || self.release_pod_name(&pod_name));
        }

        let sb = Arc::new(Sandbox::new(record.info));
        *built = Some(Arc::clone(&sb));

        self.add_sandbox(Arc::clone(&sb))?;
        {
            let sb = Arc::clone(&sb);
            rollback.push("add sandbox", move || {
                if let Err(e) = self.unregister_sandbox(&sb) {
                    warn!(id, error = %e, "Could not remove sandbox");
                }
            });
        }

        let infra_name = record.infra_name.clone();
        let held = self
            .container_id_for_name(&infra_name)
            .is_ok_and(|holder| holder == record.infra_id);
        self.reserve_container_name(&record.infra_id, &infra_name)?;
        if !held {
            rollback.push("reserve infra container name", move || {
                self.release_container_name(&infra_name)
            });
        }

        let identity = ContainerIdentity {
            id: record.infra_id.clone(),
            name: record.infra_name.clone(),
            sandbox: id.to_string(),
            labels: sb.info().labels.clone(),
            created_at: sb.info().created_at,
            dir: record.run_dir.clone(),
        };
        let infra = if record.spoofed {
            Arc::new(Container::spoofed(identity))
        } else {
            let ann = Annotations::new(id, &record.spec.annotations);
            let options = ContainerOptions {
                log_path: PathBuf::from(ann.string(LOG_PATH)),
                annotations: record.spec.annotations.clone(),
                kube_annotations: sb.info().annotations.clone(),
                image: ann.string(IMAGE).to_string(),
                runtime_handler: sb.runtime_handler().to_string(),
                config_dir: record.config_dir.clone(),
                stop_signal: ann.string(STOP_SIGNAL).to_string(),
                mount_point: ann.string(MOUNT_POINT).to_string(),
                volumes: record.volumes.clone(),
                ..Default::default()
            };
            Arc::new(Container::new(identity, options, record.spec.clone()))
        };

        sb.set_infra_container(Arc::clone(&infra))?;
        sb.restore_stopped();

        {
            let sb = Arc::clone(&sb);
            rollback.push("join namespaces", move || {
                self.release_sandbox_namespaces(&sb)
            });
        }
        for kind in SANDBOX_NAMESPACES {
            // No pinned path: the sandbox lives in the host namespace.
            let Some(path) = record.spec.namespace_path(kind) else {
                debug!(id, kind = %kind, "Using host namespace");
                continue;
            };
            let ns = self.collab.namespaces.join(kind, Path::new(path))?;
            sb.add_namespace(ns);
        }

        self.container_state_from_disk(&infra).await?;
        // Write back in case an exit code was never persisted before restart.
        self.container_state_to_disk(&infra).await?;

        sb.set_created();
        let process_label = sb.process_label().to_string();
        if !process_label.is_empty() {
            self.collab.labels.reserve_label(&process_label)?;
            rollback.push("reserve process label", move || {
                if let Err(e) = self.collab.labels.release_label(&process_label) {
                    warn!(label = %process_label, error = %e, "Could not release label");
                }
            });
        }

        self.ctr_id_index.add(infra.id())?;
        {
            let infra_id = infra.id().to_string();
            rollback.push("index infra container", move || {
                if let Err(e) = self.ctr_id_index.delete(&infra_id) {
                    warn!(id = %infra_id, error = %e, "Could not delete container ID");
                }
            });
        }
        self.add_infra_container(Arc::clone(&infra));
        {
            let infra_id = infra.id().to_string();
            rollback.push("add infra container", move || {
                self.remove_infra_container(&infra_id)
            });
        }
        self.pod_id_index.add(id)?;

        rollback.commit();
        Ok(sb)
    }

    fn read_sandbox_record(&self, id: &str) -> Result<SandboxRecord> {
        if self.has_sandbox(id) || self.pod_id_index.contains(id) {
            return Err(Error::IdAlreadyExists(id.to_string()));
        }

        let data = self.collab.storage.from_container_directory(id, CONFIG_FILE)?;
        let spec = Spec::from_slice(id, &data)?;
        let ann = Annotations::new(id, &spec.annotations);

        let labels: Option<HashMap<String, String>> = ann.json(LABELS)?;
        let name = required(&ann, NAME)?.to_string();
        let metadata: PodSandboxMetadata = ann.json(METADATA)?;
        let kube_annotations: Option<HashMap<String, String>> = ann.json(ANNOTATIONS)?;
        let port_mappings: Option<Vec<PortMapping>> = ann.json(PORT_MAPPINGS)?;
        let namespace_options = ann.json(NAMESPACE_OPTIONS)?;
        let created_at = ann.timestamp(CREATED)?;
        let pod_linux_overhead = ann.optional_json(POD_LINUX_OVERHEAD)?.unwrap_or_default();
        let pod_linux_resources = ann.optional_json(POD_LINUX_RESOURCES)?.unwrap_or_default();
        let volumes = ann.optional_json(VOLUMES)?.unwrap_or_default();
        let infra_id = required(&ann, CONTAINER_ID)?.to_string();
        let infra_name = required(&ann, CONTAINER_NAME)?.to_string();

        let log_dir = Path::new(ann.string(LOG_PATH))
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let runtime_handler = match ann.string(RUNTIME_HANDLER) {
            "" => self.config.default_runtime_handler.clone(),
            handler => handler.to_string(),
        };

        let info = SandboxInfo {
            id: id.to_string(),
            name,
            namespace: ann.string(NAMESPACE).to_string(),
            kube_name: ann.string(KUBE_NAME).to_string(),
            log_dir,
            labels: labels.unwrap_or_default(),
            annotations: kube_annotations.unwrap_or_default(),
            process_label: spec.process_label().to_string(),
            mount_label: spec.mount_label().to_string(),
            metadata,
            shm_path: ann.string(SHM_PATH).to_string(),
            cgroup_parent: ann.string(CGROUP_PARENT).to_string(),
            privileged: ann.flag(PRIVILEGED_RUNTIME),
            runtime_handler,
            resolv_path: ann.string(RESOLV_PATH).to_string(),
            hostname: ann.string(HOSTNAME).to_string(),
            hostname_path: ann.string(HOSTNAME_PATH).to_string(),
            port_mappings: port_mappings.unwrap_or_default(),
            host_network: ann.flag(HOST_NETWORK),
            created_at,
            userns_mode: ann.string(USERNS_MODE).to_string(),
            seccomp_profile_path: ann.string(SECCOMP_PROFILE_PATH).to_string(),
            namespace_options,
            pod_linux_overhead,
            pod_linux_resources,
        };
        // Decided at creation time; the current configuration may differ.
        let spoofed = ann.flag(SPOOFED_CONTAINER);

        let run_dir = self.collab.storage.container_run_directory(id)?;
        let config_dir = self.collab.storage.container_directory(id)?;

        Ok(SandboxRecord {
            spec,
            info,
            infra_id,
            infra_name,
            spoofed,
            run_dir,
            config_dir,
            volumes,
        })
    }

    // =========================================================================
    // Container recovery
    // =========================================================================

    /// Rebuilds container `id` from disk and registers it.
    ///
    /// Its sandbox must already be registered.
    ///
    /// # Errors
    ///
    /// - [`Error::ForeignContainer`] if another manager owns the container
    /// - [`Error::OrphanContainer`] if its sandbox is not registered
    /// - [`Error::MalformedPersistedState`] if `config.json` is unusable
    #[instrument(skip(self))]
    pub async fn load_container(&self, id: &str) -> Result<Arc<Container>> {
        let record = self.read_container_record(id)?;
        let mut rollback = Rollback::new();

        let name = record.identity.name.clone();
        let held = self.container_id_for_name(&name).is_ok_and(|holder| holder == id);
        self.reserve_container_name(id, &name)?;
        if !held {
            rollback.push("reserve container name", move || {
                self.release_container_name(&name)
            });
        }

        let ctr = Arc::new(Container::new(
            record.identity,
            record.options,
            record.spec,
        ));

        self.container_state_from_disk(&ctr).await?;
        // Write back in case an exit code was never persisted before restart.
        self.container_state_to_disk(&ctr).await?;
        ctr.set_created();

        self.add_container(Arc::clone(&ctr));
        {
            let ctr = Arc::clone(&ctr);
            rollback.push("add container", move || self.remove_container(&ctr));
        }
        self.ctr_id_index.add(id)?;

        rollback.commit();
        info!(id, name = %ctr.name(), sandbox = %ctr.sandbox(), "Restored container");
        Ok(ctr)
    }

    fn read_container_record(&self, id: &str) -> Result<ContainerRecord> {
        let data = self.collab.storage.from_container_directory(id, CONFIG_FILE)?;
        let spec = Spec::from_slice(id, &data)?;
        let ann = Annotations::new(id, &spec.annotations);

        if let Some(manager) = ann.get(CONTAINER_MANAGER)
            && manager != self.config.container_manager
        {
            return Err(Error::ForeignContainer {
                id: id.to_string(),
                manager: manager.to_string(),
            });
        }
        if self.has_container(id) || self.get_infra_container(id).is_some() {
            return Err(Error::IdAlreadyExists(id.to_string()));
        }

        let labels: Option<HashMap<String, String>> = ann.json(LABELS)?;
        let name = required(&ann, NAME)?.to_string();
        let metadata: ContainerMetadata = ann.json(METADATA)?;
        let kube_annotations: Option<HashMap<String, String>> = ann.json(ANNOTATIONS)?;
        let created_at = ann.timestamp(CREATED)?;
        let volumes = ann.optional_json(VOLUMES)?.unwrap_or_default();
        let sandbox_id = required(&ann, SANDBOX_ID)?;

        let sb = self
            .get_sandbox(sandbox_id)
            .ok_or_else(|| Error::OrphanContainer {
                id: id.to_string(),
                sandbox: sandbox_id.to_string(),
            })?;

        let identity = ContainerIdentity {
            id: id.to_string(),
            name,
            sandbox: sb.id().to_string(),
            labels: labels.unwrap_or_default(),
            created_at,
            dir: self.collab.storage.container_run_directory(id)?,
        };
        let options = ContainerOptions {
            log_path: PathBuf::from(ann.string(LOG_PATH)),
            annotations: spec.annotations.clone(),
            kube_annotations: kube_annotations.unwrap_or_default(),
            image: ann.string(IMAGE).to_string(),
            image_name: ann.string(IMAGE_NAME).to_string(),
            image_ref: ann.string(IMAGE_REF).to_string(),
            metadata: Some(metadata),
            tty: ann.flag(TTY),
            stdin: ann.flag(STDIN),
            stdin_once: ann.flag(STDIN_ONCE),
            runtime_handler: sb.runtime_handler().to_string(),
            config_dir: self.collab.storage.container_directory(id)?,
            stop_signal: ann.string(STOP_SIGNAL).to_string(),
            mount_point: ann.string(MOUNT_POINT).to_string(),
            seccomp_profile_path: ann.string(SECCOMP_PROFILE_PATH).to_string(),
            volumes,
        };

        Ok(ContainerRecord {
            spec,
            identity,
            options,
        })
    }

    // =========================================================================
    // Restore driver
    // =========================================================================

    /// Recovers every listed sandbox, then every listed container.
    ///
    /// Failures are logged and skipped so one bad record does not keep the
    /// rest from coming back.
    pub async fn restore<S, C>(&self, sandbox_ids: S, container_ids: C) -> RestoreReport
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let mut report = RestoreReport::default();

        for id in sandbox_ids {
            let id = id.as_ref();
            match self.load_sandbox(id).await {
                Ok(_) => report.sandboxes.push(id.to_string()),
                Err(e) => {
                    warn!(id, error = %e, "Could not restore sandbox");
                    report.failed.push((id.to_string(), e.source));
                }
            }
        }

        for id in container_ids {
            let id = id.as_ref();
            match self.load_container(id).await {
                Ok(_) => report.containers.push(id.to_string()),
                Err(Error::ForeignContainer { manager, .. }) => {
                    debug!(id, manager = %manager, "Skipping container of another manager");
                    report.foreign.push(id.to_string());
                }
                Err(e) => {
                    warn!(id, error = %e, "Could not restore container");
                    report.failed.push((id.to_string(), e));
                }
            }
        }

        info!(
            sandboxes = report.sandboxes.len(),
            containers = report.containers.len(),
            failed = report.failed.len(),
            "Restore complete"
        );
        report
    }
}

/// Returns a scalar annotation that must be present and non-empty.
fn required<'a>(ann: &Annotations<'a>, key: &str) -> Result<&'a str> {
    ann.get(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::malformed(ann.id(), format!("missing {key} annotation")))
}
