//! # State Layer Constants
//!
//! Annotation keys, on-disk layout names, timeouts, and identifier limits.
//! These constants are the **single source of truth** for the persisted
//! record format: every key written into `config.json` at creation time is
//! named here, and recovery reads exactly these keys back.
//!
//! ## Cross-References
//!
//! - [`crate::annotations`]: typed decoding of the keys below
//! - [`crate::storage`]: directory layout names
//! - [`crate::persist`]: state file name

use std::time::Duration;

// =============================================================================
// Ownership
// =============================================================================

/// Identity written into [`CONTAINER_MANAGER`] for containers created here.
///
/// Recovery refuses to adopt containers carrying any other value.
pub const CONTAINER_MANAGER_IDENTITY: &str = "magikcri";

/// Annotation naming the manager that created a container.
pub const CONTAINER_MANAGER: &str = "io.container.manager";

// =============================================================================
// Annotation Keys
// =============================================================================
//
// JSON-valued keys hold an independently encoded JSON document inside the
// annotation string. Scalar keys hold plain strings; boolean keys hold
// exactly "true" when set.
// =============================================================================

/// Prefix shared by all keys owned by this crate.
pub const ANNOTATION_PREFIX: &str = "io.magikcri.";

/// Labels (JSON object).
pub const LABELS: &str = "io.magikcri.Labels";
/// Kubernetes-style annotations (JSON object).
pub const ANNOTATIONS: &str = "io.magikcri.Annotations";
/// Pod or container metadata (JSON object).
pub const METADATA: &str = "io.magikcri.Metadata";
/// Port mappings (JSON array).
pub const PORT_MAPPINGS: &str = "io.magikcri.PortMappings";
/// Namespace options (JSON object).
pub const NAMESPACE_OPTIONS: &str = "io.magikcri.NamespaceOptions";
/// Pod-level resource overhead (JSON object, optional).
pub const POD_LINUX_OVERHEAD: &str = "io.magikcri.PodLinuxOverhead";
/// Pod-level resource limits (JSON object, optional).
pub const POD_LINUX_RESOURCES: &str = "io.magikcri.PodLinuxResources";
/// Container volumes (JSON array, optional).
pub const VOLUMES: &str = "io.magikcri.Volumes";

/// Entity name as reserved in the name index.
pub const NAME: &str = "io.magikcri.Name";
/// Kubernetes namespace of the pod.
pub const NAMESPACE: &str = "io.magikcri.Namespace";
/// Kubernetes name of the pod.
pub const KUBE_NAME: &str = "io.magikcri.KubeName";
/// Log file path.
pub const LOG_PATH: &str = "io.magikcri.LogPath";
/// Creation timestamp, RFC 3339 with nanoseconds.
pub const CREATED: &str = "io.magikcri.Created";
/// Owning sandbox identifier.
pub const SANDBOX_ID: &str = "io.magikcri.SandboxID";
/// Infra container identifier (sandbox records only).
pub const CONTAINER_ID: &str = "io.magikcri.ContainerID";
/// Infra container name (sandbox records only).
pub const CONTAINER_NAME: &str = "io.magikcri.ContainerName";
/// Image identifier.
pub const IMAGE: &str = "io.magikcri.Image";
/// Image name as requested.
pub const IMAGE_NAME: &str = "io.magikcri.ImageName";
/// Resolved image reference.
pub const IMAGE_REF: &str = "io.magikcri.ImageRef";
/// Root filesystem mount point.
pub const MOUNT_POINT: &str = "io.magikcri.MountPoint";
/// Seccomp profile path.
pub const SECCOMP_PROFILE_PATH: &str = "io.magikcri.SeccompProfilePath";
/// Shared memory path.
pub const SHM_PATH: &str = "io.magikcri.ShmPath";
/// Cgroup parent.
pub const CGROUP_PARENT: &str = "io.magikcri.CgroupParent";
/// Runtime handler name.
pub const RUNTIME_HANDLER: &str = "io.magikcri.RuntimeHandler";
/// Host resolution file path.
pub const RESOLV_PATH: &str = "io.magikcri.ResolvPath";
/// Hostname.
pub const HOSTNAME: &str = "io.magikcri.HostName";
/// Path of the file holding the hostname.
pub const HOSTNAME_PATH: &str = "io.magikcri.HostnamePath";
/// User namespace mode.
pub const USERNS_MODE: &str = "io.magikcri.UsernsMode";

/// Privileged sandbox flag.
pub const PRIVILEGED_RUNTIME: &str = "io.magikcri.PrivilegedRuntime";
/// Host network flag.
pub const HOST_NETWORK: &str = "io.magikcri.HostNetwork";
/// Infra container was created without a backing process.
pub const SPOOFED_CONTAINER: &str = "io.magikcri.SpoofedContainer";
/// TTY flag.
pub const TTY: &str = "io.magikcri.TTY";
/// Stdin flag.
pub const STDIN: &str = "io.magikcri.Stdin";
/// Stdin-once flag.
pub const STDIN_ONCE: &str = "io.magikcri.StdinOnce";

/// Image-provided stop signal (OCI image spec key).
pub const STOP_SIGNAL: &str = "org.opencontainers.image.stopSignal";

// =============================================================================
// On-Disk Layout
// =============================================================================

/// Persisted low-level process specification.
pub const CONFIG_FILE: &str = "config.json";

/// Persisted runtime status, inside a container's run directory.
pub const STATE_FILE: &str = "state.json";

/// Directory holding per-container directories under a storage root.
pub const CONTAINERS_DIR: &str = "containers";

/// Per-container subdirectory holding the entity's own files.
pub const USERDATA_DIR: &str = "userdata";

/// Permissions for state files.
pub const STATE_FILE_MODE: u32 = 0o644;

// =============================================================================
// Runtime Status
// =============================================================================

/// Default deadline for one runtime status query.
///
/// Recovery runs once per entity at startup; a hung runtime must not stall
/// the whole node from coming up.
pub const DEFAULT_RUNTIME_STATUS_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code recorded when a container vanished without a known exit code.
pub const UNKNOWN_EXIT_CODE: i32 = 255;

/// OCI runtime spec version stamped into fresh states.
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.2";

// =============================================================================
// Identifier Validation
// =============================================================================

/// Valid characters for identifiers used in filesystem paths.
///
/// **Security**: Excludes `/`, `.`, and other characters that could be used
/// for path traversal when identifiers are joined onto storage roots.
pub const CONTAINER_ID_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum identifier length.
pub const MAX_CONTAINER_ID_LEN: usize = 128;

/// Validates an identifier before it is used to build a path.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked to ensure the ID is safe"]
pub fn validate_container_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("container ID cannot be empty");
    }
    if id.len() > MAX_CONTAINER_ID_LEN {
        return Err("container ID exceeds maximum length");
    }
    if !id.chars().all(|c| CONTAINER_ID_VALID_CHARS.contains(c)) {
        return Err("container ID contains invalid characters");
    }
    Ok(())
}
