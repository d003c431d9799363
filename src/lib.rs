//! # magikcri
//!
//! **Node-Local Sandbox and Container State Registry**
//!
//! This crate keeps the in-memory view of every pod sandbox and container on
//! a node, and rebuilds that view from disk after the daemon restarts. It
//! does not create or start anything: provisioning, image handling and the
//! gRPC surface live above it, and the low-level runtime lives below it.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        ContainerServer                              │
//! │  add / get / remove / list   sandboxes, containers, infra containers│
//! │  reserve / release / lookup  pod and container names                │
//! │  load_sandbox / load_container / restore                            │
//! │  update_container_linux_resources / shutdown                        │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Registrar (names)  │  TruncIndex (ids)  │  MemoryStore (entities)  │
//! │  ProcessLevels (isolation level refcounts)                          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  persist: atomic state.json      rollback: compensating steps       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                         Collaborators                               │
//! │  StorageDirectories │ ContainerRuntime │ NamespaceManager           │
//! │  LabelReserver      │ LevelPool        │ StatsCollector             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # On-Disk Layout
//!
//! ```text
//! <root>/containers/<id>/userdata/config.json      OCI spec + annotations
//! <run_root>/containers/<id>/userdata/state.json   last observed state
//! ```
//!
//! Entity fields (labels, metadata, port mappings, namespace options, ...)
//! are stored as annotations on `config.json`, each value JSON-encoded on its
//! own. `state.json` is only ever replaced through an atomic rename.
//!
//! # Recovery
//!
//! Sandboxes must be recovered before their containers. Each recovery is a
//! sequence of steps with an undo per side effect; any failure, or dropping
//! the future, unwinds what was done so the registry is left as it was.
//!
//! ```text
//!   restore(sandbox_ids, container_ids)
//!        │
//!        ├── load_sandbox(id)  ×N   names → store → namespaces → state → indexes
//!        │
//!        └── load_container(id) ×M  owner check → sandbox check → name → state → store
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use magikcri::{ContainerServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> magikcri::Result<()> {
//!     let config = ServerConfig::from_file("/etc/magikcri/config.json".as_ref())?;
//!     let server = ContainerServer::open(config, Arc::new(MyRuntime::new()))?;
//!
//!     let report = server.restore(&sandbox_ids, &container_ids).await;
//!     for (id, err) in &report.failed {
//!         eprintln!("skipped {id}: {err}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod annotations;
pub mod config;
pub mod constants;
pub mod container;
pub mod cri;
pub mod error;
pub mod namespace;
pub mod persist;
pub mod registrar;
pub mod rollback;
pub mod runtime;
pub mod sandbox;
pub mod security;
pub mod server;
pub mod spec;
pub mod stats;
pub mod storage;
pub mod store;
pub mod truncindex;

// Re-exports
pub use config::ServerConfig;
pub use constants::*;
pub use container::{Container, ContainerIdentity, ContainerOptions};
pub use error::{Error, LoadSandboxError, Result};
pub use namespace::{FileNamespaceManager, ManagedNamespace, NamespaceManager};
pub use registrar::Registrar;
pub use runtime::{ContainerRuntime, ContainerState, ContainerStatus, RuntimeStatus};
pub use sandbox::{Sandbox, SandboxInfo};
pub use security::{LabelReserver, LevelPool, NoopLabels, NoopLevelPool, ProcessLevels};
pub use server::{Collaborators, ContainerServer, RestoreReport};
pub use spec::{LinuxResources, NamespaceType, Spec};
pub use stats::{NoopStats, StatsCollector};
pub use storage::{DirectoryStore, StorageDirectories};
pub use store::{ContainerStore, MemoryStore, SandboxStore};
pub use truncindex::TruncIndex;
