//! Sandbox (pod) entity.
//!
//! A [`Sandbox`] owns its infra container and the namespaces it joined.
//! Ordinary containers are attached by identifier only, so there is no
//! ownership cycle between a sandbox and its containers.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::container::Container;
use crate::cri::{LinuxContainerResources, NamespaceOption, PodSandboxMetadata, PortMapping};
use crate::error::{Error, Result};
use crate::namespace::ManagedNamespace;
use crate::persist;
use crate::runtime::{ContainerState, ContainerStatus};

/// Immutable description of a sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxInfo {
    pub id: String,
    pub name: String,
    /// Kubernetes namespace.
    pub namespace: String,
    pub kube_name: String,
    pub log_dir: PathBuf,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub process_label: String,
    pub mount_label: String,
    pub metadata: PodSandboxMetadata,
    pub shm_path: String,
    pub cgroup_parent: String,
    pub privileged: bool,
    pub runtime_handler: String,
    pub resolv_path: String,
    pub hostname: String,
    pub hostname_path: String,
    pub port_mappings: Vec<PortMapping>,
    pub host_network: bool,
    pub created_at: DateTime<Utc>,
    pub userns_mode: String,
    pub seccomp_profile_path: String,
    pub namespace_options: NamespaceOption,
    pub pod_linux_overhead: LinuxContainerResources,
    pub pod_linux_resources: LinuxContainerResources,
}

/// A tracked sandbox.
#[derive(Debug)]
pub struct Sandbox {
    info: SandboxInfo,
    infra: RwLock<Option<Arc<Container>>>,
    containers: RwLock<BTreeSet<String>>,
    namespaces: Mutex<Vec<ManagedNamespace>>,
    created: AtomicBool,
    stopped: AtomicBool,
}

impl Sandbox {
    pub fn new(info: SandboxInfo) -> Self {
        Self {
            info,
            infra: RwLock::new(None),
            containers: RwLock::new(BTreeSet::new()),
            namespaces: Mutex::new(Vec::new()),
            created: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &SandboxInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn runtime_handler(&self) -> &str {
        &self.info.runtime_handler
    }

    pub fn process_label(&self) -> &str {
        &self.info.process_label
    }

    // =========================================================================
    // Infra container
    // =========================================================================

    /// Attaches the infra container. A sandbox has at most one.
    pub fn set_infra_container(&self, ctr: Arc<Container>) -> Result<()> {
        let mut infra = self.infra.write().unwrap_or_else(|e| e.into_inner());
        if infra.is_some() {
            return Err(Error::InfraContainerAlreadySet(self.id().to_string()));
        }
        *infra = Some(ctr);
        Ok(())
    }

    pub fn infra_container(&self) -> Option<Arc<Container>> {
        self.infra.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // =========================================================================
    // Attached containers
    // =========================================================================

    pub fn add_container(&self, id: &str) {
        self.containers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    pub fn remove_container(&self, id: &str) {
        self.containers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Identifiers of attached containers.
    pub fn containers(&self) -> Vec<String> {
        self.containers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    pub fn add_namespace(&self, ns: ManagedNamespace) {
        self.namespaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ns);
    }

    /// Namespaces currently joined.
    pub fn namespaces(&self) -> Vec<ManagedNamespace> {
        self.namespaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Detaches every joined namespace, for the caller to release.
    pub fn take_namespaces(&self) -> Vec<ManagedNamespace> {
        std::mem::take(&mut *self.namespaces.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // =========================================================================
    // Lifecycle flags
    // =========================================================================

    pub fn set_created(&self) {
        self.created.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Marks the sandbox stopped if its infra container was last persisted
    /// as stopped.
    pub fn restore_stopped(&self) {
        let Some(infra) = self.infra_container() else {
            return;
        };
        let path = infra.state_path();
        if !path.exists() {
            return;
        }
        match persist::read_json::<ContainerState>(&path) {
            Ok(state) if state.status == ContainerStatus::Stopped => self.set_stopped(),
            Ok(_) => {}
            Err(e) => debug!(id = %self.id(), error = %e, "Could not peek infra state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerIdentity;
    use crate::spec::NamespaceType;
    use tempfile::TempDir;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxInfo {
            id: "sb1".into(),
            name: "k8s_pod".into(),
            ..Default::default()
        })
    }

    fn infra(dir: &std::path::Path) -> Arc<Container> {
        Arc::new(Container::spoofed(ContainerIdentity {
            id: "infra1".into(),
            sandbox: "sb1".into(),
            dir: dir.to_path_buf(),
            ..Default::default()
        }))
    }

    #[test]
    fn test_single_infra_container() {
        let temp = TempDir::new().unwrap();
        let sb = sandbox();
        sb.set_infra_container(infra(temp.path())).unwrap();
        assert!(matches!(
            sb.set_infra_container(infra(temp.path())),
            Err(Error::InfraContainerAlreadySet(_))
        ));
        assert_eq!(sb.infra_container().unwrap().id(), "infra1");
    }

    #[test]
    fn test_container_membership() {
        let sb = sandbox();
        sb.add_container("b");
        sb.add_container("a");
        assert_eq!(sb.containers(), vec!["a", "b"]);
        sb.remove_container("a");
        assert_eq!(sb.containers(), vec!["b"]);
    }

    #[test]
    fn test_take_namespaces() {
        let sb = sandbox();
        sb.add_namespace(ManagedNamespace::new(NamespaceType::Network, "/ns/net"));
        assert_eq!(sb.namespaces().len(), 1);
        assert_eq!(sb.take_namespaces().len(), 1);
        assert!(sb.namespaces().is_empty());
    }

    #[test]
    fn test_restore_stopped() {
        let temp = TempDir::new().unwrap();
        let sb = sandbox();
        let ctr = infra(temp.path());
        sb.set_infra_container(Arc::clone(&ctr)).unwrap();

        sb.restore_stopped();
        assert!(!sb.stopped());

        let mut state = ctr.state();
        state.status = ContainerStatus::Stopped;
        persist::write_json_atomic(&ctr.state_path(), 0o644, &state).unwrap();
        sb.restore_stopped();
        assert!(sb.stopped());
    }
}
