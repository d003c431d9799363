//! OCI runtime spec types as persisted in `config.json`.
//!
//! Only the parts the state layer reads are modelled; everything is optional
//! or defaulted so records written by older versions still parse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

// =============================================================================
// OCI Runtime Spec Types
// =============================================================================

/// OCI Runtime Spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default)]
    pub oci_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

impl Spec {
    /// Parses a spec from raw `config.json` bytes.
    pub fn from_slice(id: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::malformed(id, format!("error unmarshalling spec: {e}")))
    }

    /// SELinux process label, empty when unset.
    pub fn process_label(&self) -> &str {
        self.process
            .as_ref()
            .and_then(|p| p.selinux_label.as_deref())
            .unwrap_or_default()
    }

    /// SELinux mount label, empty when unset.
    pub fn mount_label(&self) -> &str {
        self.linux
            .as_ref()
            .and_then(|l| l.mount_label.as_deref())
            .unwrap_or_default()
    }

    /// Path of the namespace of `kind`, if the spec joins an existing one.
    ///
    /// `None` means the entity lives in the host's namespace of that kind:
    /// the namespace is either not listed or listed without a path.
    pub fn namespace_path(&self, kind: NamespaceType) -> Option<&str> {
        self.linux
            .as_ref()?
            .namespaces
            .iter()
            .find(|ns| ns.ns_type == kind)
            .and_then(|ns| ns.path.as_deref())
            .filter(|path| !path.is_empty())
    }

    /// Merges the fields present in `update` into this spec's resources.
    ///
    /// Missing `linux`, `resources`, `cpu` and `memory` blocks are created
    /// empty first. Absent fields in `update` leave the current value alone.
    pub fn merge_linux_resources(&mut self, update: &LinuxResources) {
        let resources = self
            .linux
            .get_or_insert_with(Linux::default)
            .resources
            .get_or_insert_with(LinuxResources::default);

        let cpu = resources.cpu.get_or_insert_with(LinuxCpu::default);
        if let Some(new) = &update.cpu {
            merge_field(&mut cpu.shares, new.shares);
            merge_field(&mut cpu.quota, new.quota);
            merge_field(&mut cpu.period, new.period);
            merge_field(&mut cpu.cpus, new.cpus.clone().filter(|s| !s.is_empty()));
            merge_field(&mut cpu.mems, new.mems.clone().filter(|s| !s.is_empty()));
        }

        let memory = resources.memory.get_or_insert_with(LinuxMemory::default);
        if let Some(new) = &update.memory {
            merge_field(&mut memory.limit, new.limit);
            merge_field(&mut memory.swap, new.swap);
        }
    }
}

fn merge_field<T>(current: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *current = update;
    }
}

/// OCI root filesystem config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub path: String,
    #[serde(default)]
    pub readonly: bool,
}

/// OCI process config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selinux_label: Option<String>,
}

/// OCI mount config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type", default)]
    pub mount_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// OCI Linux-specific config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    #[serde(default)]
    pub namespaces: Vec<LinuxNamespace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<LinuxResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgroups_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_label: Option<String>,
}

/// Kernel namespace kinds known to the OCI spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    Pid,
    Network,
    Mount,
    Ipc,
    Uts,
    User,
    Cgroup,
}

impl std::fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pid => write!(f, "pid"),
            Self::Network => write!(f, "network"),
            Self::Mount => write!(f, "mount"),
            Self::Ipc => write!(f, "ipc"),
            Self::Uts => write!(f, "uts"),
            Self::User => write!(f, "user"),
            Self::Cgroup => write!(f, "cgroup"),
        }
    }
}

/// OCI namespace config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinuxNamespace {
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// OCI resource limits. Also used as a sparse update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinuxResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<LinuxMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<LinuxCpu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<LinuxPids>,
}

/// OCI memory limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinuxMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<i64>,
}

/// OCI CPU limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinuxCpu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mems: Option<String>,
}

/// OCI PID limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinuxPids {
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_quota(quota: i64) -> Spec {
        Spec {
            linux: Some(Linux {
                resources: Some(LinuxResources {
                    cpu: Some(LinuxCpu {
                        quota: Some(quota),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_only_present_fields() {
        let mut spec = spec_with_quota(100_000);
        let update = LinuxResources {
            cpu: Some(LinuxCpu {
                shares: Some(512),
                ..Default::default()
            }),
            ..Default::default()
        };
        spec.merge_linux_resources(&update);

        let cpu = spec.linux.unwrap().resources.unwrap().cpu.unwrap();
        assert_eq!(cpu.quota, Some(100_000));
        assert_eq!(cpu.shares, Some(512));
    }

    #[test]
    fn test_merge_empty_update_creates_blocks_only() {
        let mut spec = Spec::default();
        spec.merge_linux_resources(&LinuxResources::default());
        let resources = spec.linux.unwrap().resources.unwrap();
        assert_eq!(resources.cpu, Some(LinuxCpu::default()));
        assert_eq!(resources.memory, Some(LinuxMemory::default()));
    }

    #[test]
    fn test_merge_ignores_empty_cpuset() {
        let mut spec = spec_with_quota(1);
        spec.merge_linux_resources(&LinuxResources {
            cpu: Some(LinuxCpu {
                cpus: Some("0-1".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        spec.merge_linux_resources(&LinuxResources {
            cpu: Some(LinuxCpu {
                cpus: Some(String::new()),
                ..Default::default()
            }),
            memory: Some(LinuxMemory {
                limit: Some(1 << 20),
                swap: None,
            }),
            ..Default::default()
        });
        let resources = spec.linux.unwrap().resources.unwrap();
        assert_eq!(resources.cpu.unwrap().cpus.as_deref(), Some("0-1"));
        assert_eq!(resources.memory.unwrap().limit, Some(1 << 20));
    }

    #[test]
    fn test_namespace_path() {
        let spec: Spec = serde_json::from_str(
            r#"{
                "ociVersion": "1.0.2",
                "linux": {
                    "namespaces": [
                        { "type": "pid" },
                        { "type": "network", "path": "/run/netns/pod" },
                        { "type": "ipc", "path": "" }
                    ]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(
            spec.namespace_path(NamespaceType::Network),
            Some("/run/netns/pod")
        );
        assert_eq!(spec.namespace_path(NamespaceType::Ipc), None);
        assert_eq!(spec.namespace_path(NamespaceType::Uts), None);
        assert_eq!(spec.namespace_path(NamespaceType::Pid), None);
    }

    #[test]
    fn test_malformed_spec() {
        let err = Spec::from_slice("abc", b"{not json").unwrap_err();
        assert!(matches!(err, Error::MalformedPersistedState { .. }));
    }
}
