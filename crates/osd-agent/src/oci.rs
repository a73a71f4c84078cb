//! One-shot workload runner backed by an OCI runtime binary.
//!
//! Each run renders the [`OneShotSpec`] into an OCI bundle (`config.json`
//! pointing at the image rootfs), invokes `<runtime> run --bundle <dir> <id>`
//! and waits for it to exit. The bundle directory is removed on every exit
//! path.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use osd_common::error::{OsdError, Result};
use serde::Serialize;

use crate::oneshot::{Mount, OneShotSpec, RunOutcome, WorkloadRunner};

const OCI_VERSION: &str = "1.0.2";
const DEFAULT_PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Capabilities granted to privileged workloads.
const ALL_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
];

/// Capabilities granted to unprivileged workloads.
const DEFAULT_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
];

/// Runs one-shot workloads through an OCI runtime such as `runc`.
#[derive(Debug, Clone)]
pub struct OciRunner {
    runtime_binary: PathBuf,
    bundle_dir: PathBuf,
}

impl OciRunner {
    /// Creates a runner using `runtime_binary`, placing bundles under `bundle_dir`.
    pub fn new(runtime_binary: impl Into<PathBuf>, bundle_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_binary: runtime_binary.into(),
            bundle_dir: bundle_dir.into(),
        }
    }

    fn resolve_binary(&self, id: &str) -> Result<PathBuf> {
        if self.runtime_binary.components().count() > 1 {
            return Ok(self.runtime_binary.clone());
        }
        which::which(&self.runtime_binary).map_err(|e| OsdError::Execution {
            id: id.to_string(),
            message: format!("OCI runtime {} not found: {e}", self.runtime_binary.display()),
        })
    }
}

impl WorkloadRunner for OciRunner {
    fn run(&self, spec: &OneShotSpec) -> Result<RunOutcome> {
        let binary = self.resolve_binary(&spec.id)?;
        let container_id = format!("{}-{}", spec.id, uuid::Uuid::new_v4().simple());
        let bundle = Bundle::create(&self.bundle_dir, &container_id)?;
        bundle.write_config(&render_config(spec))?;

        tracing::info!(
            id = %spec.id,
            container_id = %container_id,
            runtime = %binary.display(),
            "launching one-shot workload"
        );
        let status = Command::new(&binary)
            .arg("run")
            .arg("--bundle")
            .arg(bundle.path())
            .arg(&container_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| OsdError::Execution {
                id: spec.id.clone(),
                message: format!("failed to launch {}: {e}", binary.display()),
            })?;

        let outcome = RunOutcome {
            exit_code: status.code().unwrap_or(-1),
        };
        tracing::info!(id = %spec.id, exit_code = outcome.exit_code, "one-shot workload exited");
        Ok(outcome)
    }
}

/// A per-run bundle directory, removed on drop.
struct Bundle {
    path: PathBuf,
}

impl Bundle {
    fn create(parent: &Path, container_id: &str) -> Result<Self> {
        let path = parent.join(container_id);
        std::fs::create_dir_all(&path).map_err(|e| OsdError::io(&path, e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write_config(&self, config: &OciConfig) -> Result<()> {
        let file = self.path.join("config.json");
        let json = serde_json::to_vec_pretty(config)?;
        std::fs::write(&file, json).map_err(|e| OsdError::io(file, e))
    }
}

impl Drop for Bundle {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove bundle");
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OciConfig {
    oci_version: &'static str,
    process: OciProcess,
    root: OciRoot,
    hostname: String,
    mounts: Vec<OciMount>,
    linux: OciLinux,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OciProcess {
    terminal: bool,
    user: OciUser,
    args: Vec<String>,
    env: Vec<String>,
    cwd: &'static str,
    capabilities: OciCapabilities,
    no_new_privileges: bool,
}

#[derive(Debug, Serialize)]
struct OciUser {
    uid: u32,
    gid: u32,
}

#[derive(Debug, Serialize)]
struct OciCapabilities {
    bounding: Vec<String>,
    effective: Vec<String>,
    permitted: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OciRoot {
    path: PathBuf,
    readonly: bool,
}

#[derive(Debug, Serialize)]
struct OciMount {
    destination: PathBuf,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
    options: Vec<String>,
}

impl From<&Mount> for OciMount {
    fn from(m: &Mount) -> Self {
        Self {
            destination: m.destination.clone(),
            kind: m.kind.clone(),
            source: m.source.clone().or_else(|| Some(PathBuf::from(&m.kind))),
            options: m.options.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OciLinux {
    namespaces: Vec<OciNamespace>,
    resources: OciResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    rootfs_propagation: Option<String>,
}

#[derive(Debug, Serialize)]
struct OciNamespace {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct OciResources {
    devices: Vec<OciDeviceRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<OciMemory>,
}

#[derive(Debug, Serialize)]
struct OciDeviceRule {
    allow: bool,
    access: &'static str,
}

#[derive(Debug, Serialize)]
struct OciMemory {
    limit: u64,
}

/// Mounts every OCI container gets before the workload's own mounts.
fn base_mounts() -> Vec<Mount> {
    vec![
        Mount::pseudo("proc", "/proc", &["nosuid", "noexec", "nodev"]),
        Mount::pseudo("tmpfs", "/dev", &["nosuid", "strictatime", "mode=755", "size=65536k"]),
        Mount::pseudo(
            "devpts",
            "/dev/pts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620", "gid=5"],
        ),
        Mount::pseudo("tmpfs", "/dev/shm", &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"]),
        Mount::pseudo("sysfs", "/sys", &["nosuid", "noexec", "nodev", "ro"]),
    ]
}

fn render_config(spec: &OneShotSpec) -> OciConfig {
    let caps: Vec<String> = if spec.privileged {
        ALL_CAPABILITIES.iter().map(ToString::to_string).collect()
    } else {
        DEFAULT_CAPABILITIES.iter().map(ToString::to_string).collect()
    };

    let ns = spec.namespaces;
    let namespaces = [
        (ns.pid, "pid"),
        (ns.mount, "mount"),
        (ns.network, "network"),
        (ns.ipc, "ipc"),
        (ns.uts, "uts"),
    ]
    .into_iter()
    .filter(|(isolated, _)| *isolated)
    .map(|(_, kind)| OciNamespace { kind })
    .collect();

    OciConfig {
        oci_version: OCI_VERSION,
        process: OciProcess {
            terminal: false,
            user: OciUser { uid: 0, gid: 0 },
            args: spec.args.clone(),
            env: vec![DEFAULT_PATH_ENV.to_string()],
            cwd: "/",
            capabilities: OciCapabilities {
                bounding: caps.clone(),
                effective: caps.clone(),
                permitted: caps,
            },
            no_new_privileges: !spec.privileged,
        },
        root: OciRoot {
            path: spec.rootfs.clone(),
            readonly: false,
        },
        hostname: spec.id.clone(),
        mounts: base_mounts()
            .iter()
            .chain(spec.mounts.iter())
            .map(OciMount::from)
            .collect(),
        linux: OciLinux {
            namespaces,
            resources: OciResources {
                devices: vec![OciDeviceRule {
                    allow: spec.privileged,
                    access: "rwm",
                }],
                memory: spec.limits.memory_bytes.map(|limit| OciMemory { limit }),
            },
            rootfs_propagation: spec.rootfs_propagation.clone(),
        },
    }
}
