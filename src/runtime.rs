//! Runtime collaborator - live container status.
//!
//! The low-level runtime creates and signals processes; the state layer only
//! asks it what a container looks like *now*. This module defines:
//! - `ContainerStatus`: OCI lifecycle status
//! - `ContainerState`: the status record persisted to each container's state file
//! - `RuntimeStatus`: what the runtime reports for a container
//! - `ContainerRuntime`: the trait the runtime collaborator implements
//!
//! # OCI Runtime Spec Reference
//!
//! See: https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::{OCI_RUNTIME_SPEC_VERSION, UNKNOWN_EXIT_CODE};
use crate::error::{Error, Result};

// =============================================================================
// Container State (OCI Runtime Spec)
// =============================================================================

/// OCI Runtime Spec container status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created.
    Creating,
    /// Container has been created but not started.
    #[default]
    Created,
    /// Container is running.
    Running,
    /// Container is paused.
    Paused,
    /// Container has stopped (exited or was killed).
    Stopped,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Last-known state of a container, as persisted in its state file.
///
/// Extends the OCI state with the history the runtime may no longer know
/// after a restart: exit code and start/finish timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI version of the state schema.
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// Process ID of the container (if running).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Absolute path to the bundle directory.
    #[serde(default)]
    pub bundle: String,
    /// Annotations from the container config.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the container was created.
    pub created: DateTime<Utc>,
    /// When the process started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// When the process finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// Exit code of the process, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Whether the process was OOM killed.
    #[serde(default)]
    pub oom_killed: bool,
    /// Last runtime error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContainerState {
    /// Creates a fresh state in `status`.
    pub fn new(
        id: impl Into<String>,
        bundle: impl Into<String>,
        status: ContainerStatus,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            id: id.into(),
            status,
            pid: None,
            bundle: bundle.into(),
            annotations: HashMap::new(),
            created,
            started: None,
            finished: None,
            exit_code: None,
            oom_killed: false,
            error: None,
        }
    }

    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Folds a live runtime report into this state.
    ///
    /// Live status and pid always win. Exit code and timestamps from the
    /// runtime win when reported; otherwise the persisted history is kept.
    pub fn reconcile(&mut self, live: &RuntimeStatus) {
        self.status = live.status;
        self.pid = live.pid;
        if live.exit_code.is_some() {
            self.exit_code = live.exit_code;
        }
        if live.started.is_some() {
            self.started = live.started;
        }
        if live.finished.is_some() {
            self.finished = live.finished;
        }
        if live.oom_killed {
            self.oom_killed = true;
        }
        if self.status != ContainerStatus::Stopped {
            self.error = None;
        }
    }

    /// Marks the container as gone from the runtime.
    ///
    /// The persisted exit code is kept when known; otherwise it becomes
    /// [`UNKNOWN_EXIT_CODE`].
    pub fn mark_vanished(&mut self, now: DateTime<Utc>) {
        self.status = ContainerStatus::Stopped;
        self.pid = None;
        self.finished.get_or_insert(now);
        self.exit_code.get_or_insert(UNKNOWN_EXIT_CODE);
    }
}

/// Live status reported by the runtime collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeStatus {
    pub status: ContainerStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub oom_killed: bool,
}

impl RuntimeStatus {
    /// A running process.
    pub fn running(pid: u32) -> Self {
        Self {
            status: ContainerStatus::Running,
            pid: Some(pid),
            ..Default::default()
        }
    }

    /// An exited process.
    pub fn exited(exit_code: i32, finished: DateTime<Utc>) -> Self {
        Self {
            status: ContainerStatus::Stopped,
            exit_code: Some(exit_code),
            finished: Some(finished),
            ..Default::default()
        }
    }
}

// =============================================================================
// Runtime Trait
// =============================================================================

/// Low-level runtime as seen by the state layer.
///
/// Implementations wrap whatever actually drives the kernel container
/// interface. Only status queries are needed here.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the runtime name.
    fn name(&self) -> &str;

    /// Queries the live status of container `id` under `bundle`.
    ///
    /// # Errors
    ///
    /// [`Error::ContainerNotFound`] if the runtime no longer knows the
    /// container; any other error is a failed query.
    async fn status(&self, id: &str, bundle: &str) -> Result<RuntimeStatus>;
}

/// Maps a runtime query failure, keeping "not found" distinguishable.
pub fn runtime_error(runtime: &str, id: &str, reason: impl std::fmt::Display) -> Error {
    Error::Runtime {
        runtime: runtime.to_string(),
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ContainerState {
        ContainerState::new("c1", "/run/c1", ContainerStatus::Running, Utc::now())
    }

    #[test]
    fn test_container_state() {
        let state = state();
        assert!(state.is_running());
        assert_eq!(state.id, "c1");
        assert_eq!(state.oci_version, "1.0.2");
    }

    #[test]
    fn test_reconcile_live_wins() {
        let mut state = state();
        state.pid = Some(10);
        state.reconcile(&RuntimeStatus::running(42));
        assert_eq!(state.pid, Some(42));
        assert_eq!(state.status, ContainerStatus::Running);
    }

    #[test]
    fn test_reconcile_keeps_history() {
        let mut state = state();
        state.status = ContainerStatus::Stopped;
        state.exit_code = Some(3);
        let live = RuntimeStatus {
            status: ContainerStatus::Stopped,
            ..Default::default()
        };
        state.reconcile(&live);
        assert_eq!(state.exit_code, Some(3));
    }

    #[test]
    fn test_mark_vanished() {
        let now = Utc::now();
        let mut state = state();
        state.pid = Some(7);
        state.mark_vanished(now);
        assert_eq!(state.status, ContainerStatus::Stopped);
        assert_eq!(state.pid, None);
        assert_eq!(state.exit_code, Some(UNKNOWN_EXIT_CODE));
        assert_eq!(state.finished, Some(now));

        let mut state = ContainerState::new("c2", "", ContainerStatus::Stopped, now);
        state.exit_code = Some(0);
        state.mark_vanished(now);
        assert_eq!(state.exit_code, Some(0));
    }

    #[test]
    fn test_state_json_field_names() {
        let mut state = state();
        state.exit_code = Some(1);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["exitCode"], 1);
        assert!(json.get("ociVersion").is_some());
    }
}
