//! Shared test doubles and on-disk fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use magikcri::annotations::format_timestamp;
use magikcri::constants::*;
use magikcri::runtime::runtime_error;
use magikcri::spec::{Linux, LinuxCpu, LinuxNamespace, LinuxResources, Process};
use magikcri::{
    Collaborators, ContainerRuntime, ContainerServer, ContainerState, ContainerStatus,
    DirectoryStore, Error, LabelReserver, LevelPool, ManagedNamespace, NamespaceManager,
    NamespaceType, Result, RuntimeStatus, ServerConfig, Spec, StatsCollector, StorageDirectories,
};

// =============================================================================
// Runtime
// =============================================================================

/// Canned answer of [`MockRuntime`] for one container.
#[derive(Debug, Clone)]
pub enum Reply {
    Live(RuntimeStatus),
    Gone,
    Fail,
}

/// Runtime answering from a table. Unknown ids are reported gone.
#[derive(Debug, Default)]
pub struct MockRuntime {
    replies: Mutex<HashMap<String, Reply>>,
    delay: Mutex<Option<Duration>>,
    queries: AtomicUsize,
}

impl MockRuntime {
    pub fn set(&self, id: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(id.to_string(), reply);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn status(&self, id: &str, _bundle: &str) -> Result<RuntimeStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().unwrap().get(id).cloned();
        match reply {
            Some(Reply::Live(status)) => Ok(status),
            Some(Reply::Fail) => Err(runtime_error("mock", id, "injected failure")),
            Some(Reply::Gone) | None => Err(Error::ContainerNotFound(id.to_string())),
        }
    }
}

// =============================================================================
// Namespaces
// =============================================================================

/// Namespace manager that only records joins.
#[derive(Debug, Default)]
pub struct MockNamespaces {
    held: Mutex<Vec<ManagedNamespace>>,
    fail_join: Mutex<Option<NamespaceType>>,
    fail_release: AtomicBool,
}

impl MockNamespaces {
    pub fn fail_join(&self, kind: NamespaceType) {
        *self.fail_join.lock().unwrap() = Some(kind);
    }

    pub fn fail_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    pub fn held(&self) -> Vec<ManagedNamespace> {
        self.held.lock().unwrap().clone()
    }
}

impl NamespaceManager for MockNamespaces {
    fn join(&self, kind: NamespaceType, path: &Path) -> Result<ManagedNamespace> {
        if *self.fail_join.lock().unwrap() == Some(kind) {
            return Err(Error::Namespace {
                kind: kind.to_string(),
                path: path.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }
        let ns = ManagedNamespace::new(kind, path);
        self.held.lock().unwrap().push(ns.clone());
        Ok(ns)
    }

    fn release(&self, ns: &ManagedNamespace) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        if let Some(pos) = held.iter().position(|h| h == ns) {
            held.remove(pos);
        }
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(Error::Namespace {
                kind: ns.kind.to_string(),
                path: ns.path.clone(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Security
// =============================================================================

#[derive(Debug, Default)]
pub struct MockLabels {
    reserved: Mutex<Vec<String>>,
    fail_reserve: AtomicBool,
}

impl MockLabels {
    pub fn fail_reserve(&self) {
        self.fail_reserve.store(true, Ordering::SeqCst);
    }

    pub fn reserved(&self) -> Vec<String> {
        self.reserved.lock().unwrap().clone()
    }
}

impl LabelReserver for MockLabels {
    fn reserve_label(&self, label: &str) -> Result<()> {
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(Error::Label {
                label: label.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.reserved.lock().unwrap().push(label.to_string());
        Ok(())
    }

    fn release_label(&self, label: &str) -> Result<()> {
        self.reserved.lock().unwrap().retain(|l| l != label);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockLevels {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    fail_acquire: AtomicBool,
}

impl MockLevels {
    pub fn fail_acquire(&self) {
        self.fail_acquire.store(true, Ordering::SeqCst);
    }
}

impl LevelPool for MockLevels {
    fn acquire(&self, level: &str) -> Result<()> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(Error::Label {
                label: level.to_string(),
                reason: "pool exhausted".to_string(),
            });
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _level: &str) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Stats and storage
// =============================================================================

#[derive(Debug, Default)]
pub struct MockStats {
    pub containers: Mutex<Vec<String>>,
    pub sandboxes: Mutex<Vec<String>>,
    pub shut_down: AtomicBool,
}

impl StatsCollector for MockStats {
    fn remove_stats_for_container(&self, id: &str) {
        self.containers.lock().unwrap().push(id.to_string());
    }

    fn remove_stats_for_sandbox(&self, id: &str) {
        self.sandboxes.lock().unwrap().push(id.to_string());
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Storage whose shutdown fails with a fixed error.
pub struct FailingShutdown {
    pub inner: DirectoryStore,
    pub error: fn() -> Error,
}

impl StorageDirectories for FailingShutdown {
    fn container_directory(&self, id: &str) -> Result<PathBuf> {
        self.inner.container_directory(id)
    }

    fn container_run_directory(&self, id: &str) -> Result<PathBuf> {
        self.inner.container_run_directory(id)
    }

    fn shutdown(&self, _force: bool) -> Result<()> {
        Err((self.error)())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A server wired to test doubles over a temporary directory store.
pub struct Harness {
    pub temp: TempDir,
    pub storage: Arc<DirectoryStore>,
    pub runtime: Arc<MockRuntime>,
    pub namespaces: Arc<MockNamespaces>,
    pub labels: Arc<MockLabels>,
    pub levels: Arc<MockLevels>,
    pub stats: Arc<MockStats>,
    pub server: ContainerServer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(f: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let temp = TempDir::new().unwrap();
        let config = f(ServerConfig::default()
            .with_root(temp.path().join("lib"))
            .with_run_root(temp.path().join("run")));
        let storage = Arc::new(DirectoryStore::with_paths(&config.root, &config.run_root).unwrap());
        let runtime = Arc::new(MockRuntime::default());
        let namespaces = Arc::new(MockNamespaces::default());
        let labels = Arc::new(MockLabels::default());
        let levels = Arc::new(MockLevels::default());
        let stats = Arc::new(MockStats::default());

        let collab = Collaborators::new(storage.clone(), runtime.clone())
            .with_namespaces(namespaces.clone())
            .with_labels(labels.clone())
            .with_levels(levels.clone())
            .with_stats(stats.clone());
        let server = ContainerServer::new(config, collab);

        Self {
            temp,
            storage,
            runtime,
            namespaces,
            labels,
            levels,
            stats,
            server,
        }
    }

    pub fn run_dir(&self, id: &str) -> PathBuf {
        self.storage.container_run_directory(id).unwrap()
    }

    pub fn state_path(&self, id: &str) -> PathBuf {
        self.run_dir(id).join(STATE_FILE)
    }

    pub fn write_config(&self, id: &str, spec: &Spec) {
        let dir = self.storage.container_directory(id).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE), serde_json::to_vec(spec).unwrap()).unwrap();
    }

    pub fn write_raw_config(&self, id: &str, data: &[u8]) {
        let dir = self.storage.container_directory(id).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE), data).unwrap();
    }

    /// Writes the state file kept in the run directory of `id`.
    pub fn write_state(&self, id: &str, state: &ContainerState) {
        let dir = self.run_dir(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(STATE_FILE), serde_json::to_vec(state).unwrap()).unwrap();
    }

    pub fn read_state(&self, id: &str) -> ContainerState {
        serde_json::from_slice(&fs::read(self.state_path(id)).unwrap()).unwrap()
    }

    /// Persists a sandbox and the state of its infra container.
    pub fn seed_sandbox(&self, fx: &SandboxFixture) {
        self.write_config(&fx.id, &fx.spec());
        self.write_state(&fx.id, &running_state(&fx.infra_id, 100));
        self.runtime
            .set(&fx.infra_id, Reply::Live(RuntimeStatus::running(100)));
    }

    /// Persists a container and its state.
    pub fn seed_container(&self, fx: &ContainerFixture) {
        self.write_config(&fx.id, &fx.spec());
        self.write_state(&fx.id, &running_state(&fx.id, 200));
        self.runtime
            .set(&fx.id, Reply::Live(RuntimeStatus::running(200)));
    }
}

pub fn created_at() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-02T03:04:05.123456789Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn running_state(id: &str, pid: u32) -> ContainerState {
    let mut state = ContainerState::new(id, "", ContainerStatus::Running, created_at());
    state.pid = Some(pid);
    state.started = Some(created_at());
    state
}

// =============================================================================
// Persisted records
// =============================================================================

/// A persisted sandbox record.
#[derive(Debug, Clone)]
pub struct SandboxFixture {
    pub id: String,
    pub name: String,
    pub infra_id: String,
    pub infra_name: String,
    pub process_label: String,
    pub spoofed: bool,
    pub namespaces: Vec<(NamespaceType, String)>,
    pub extra: HashMap<String, String>,
}

impl SandboxFixture {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("k8s_POD_{id}_default_uid-{id}_0"),
            infra_id: format!("{id}infra"),
            infra_name: format!("k8s_POD_{id}_default_uid-{id}_0_infra"),
            process_label: String::new(),
            spoofed: false,
            namespaces: vec![
                (NamespaceType::Network, format!("/var/run/netns/{id}")),
                (NamespaceType::Ipc, format!("/var/run/ipcns/{id}")),
                (NamespaceType::Uts, format!("/var/run/utsns/{id}")),
            ],
            extra: HashMap::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.process_label = label.to_string();
        self
    }

    pub fn spoofed(mut self) -> Self {
        self.spoofed = true;
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn spec(&self) -> Spec {
        let id = &self.id;
        let mut annotations: HashMap<String, String> = [
            (LABELS, r#"{"app":"web"}"#.to_string()),
            (ANNOTATIONS, r#"{"owner":"team-a"}"#.to_string()),
            (
                METADATA,
                format!(r#"{{"name":"web","uid":"uid-{id}","namespace":"default","attempt":0}}"#),
            ),
            (
                PORT_MAPPINGS,
                r#"[{"hostPort":8080,"containerPort":80,"protocol":"tcp"}]"#.to_string(),
            ),
            (NAMESPACE_OPTIONS, r#"{"network":"POD","pid":"CONTAINER"}"#.to_string()),
            (CREATED, format_timestamp(&created_at())),
            (NAME, self.name.clone()),
            (NAMESPACE, "default".to_string()),
            (KUBE_NAME, "web".to_string()),
            (LOG_PATH, format!("/var/log/pods/{id}/infra.log")),
            (CONTAINER_ID, self.infra_id.clone()),
            (CONTAINER_NAME, self.infra_name.clone()),
            (RUNTIME_HANDLER, "runc".to_string()),
            (HOSTNAME, "web-0".to_string()),
            (SPOOFED_CONTAINER, self.spoofed.to_string()),
            (MOUNT_POINT, format!("/var/lib/magikcri/overlay/{id}/merged")),
            (CONTAINER_MANAGER, CONTAINER_MANAGER_IDENTITY.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        annotations.extend(self.extra.clone());

        Spec {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            process: (!self.process_label.is_empty()).then(|| Process {
                selinux_label: Some(self.process_label.clone()),
                ..Default::default()
            }),
            annotations,
            linux: Some(Linux {
                namespaces: self
                    .namespaces
                    .iter()
                    .map(|(kind, path)| LinuxNamespace {
                        ns_type: *kind,
                        path: Some(path.clone()),
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A persisted workload container record.
#[derive(Debug, Clone)]
pub struct ContainerFixture {
    pub id: String,
    pub name: String,
    pub sandbox: String,
    pub manager: Option<String>,
    pub extra: HashMap<String, String>,
}

impl ContainerFixture {
    pub fn new(id: &str, sandbox: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("k8s_web_{sandbox}_{id}_0"),
            sandbox: sandbox.to_string(),
            manager: Some(CONTAINER_MANAGER_IDENTITY.to_string()),
            extra: HashMap::new(),
        }
    }

    pub fn managed_by(mut self, manager: Option<&str>) -> Self {
        self.manager = manager.map(str::to_string);
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn spec(&self) -> Spec {
        let mut annotations: HashMap<String, String> = [
            (LABELS, r#"{"app":"web","tier":"frontend"}"#.to_string()),
            (ANNOTATIONS, "{}".to_string()),
            (METADATA, r#"{"name":"web","attempt":1}"#.to_string()),
            (CREATED, format_timestamp(&created_at())),
            (NAME, self.name.clone()),
            (SANDBOX_ID, self.sandbox.clone()),
            (IMAGE, "sha256:0123456789abcdef".to_string()),
            (IMAGE_NAME, "docker.io/library/nginx:1.27".to_string()),
            (LOG_PATH, format!("/var/log/pods/{}/web.log", self.sandbox)),
            (TTY, "true".to_string()),
            (STOP_SIGNAL, "SIGQUIT".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        if let Some(manager) = &self.manager {
            annotations.insert(CONTAINER_MANAGER.to_string(), manager.clone());
        }
        annotations.extend(self.extra.clone());

        Spec {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            annotations,
            linux: Some(Linux {
                resources: Some(LinuxResources {
                    cpu: Some(LinuxCpu {
                        quota: Some(100_000),
                        period: Some(100_000),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
