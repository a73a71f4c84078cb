//! Run-to-completion contract for one-shot workloads.
//!
//! A [`WorkloadRunner`] launches a [`OneShotSpec`] and blocks until the
//! workload exits. The agent only consumes this contract; [`crate::oci`]
//! provides the implementation used in production.

use std::path::PathBuf;

use osd_common::error::Result;

/// A filesystem mount inside a one-shot workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Filesystem type, e.g. `bind` or `cgroup`.
    pub kind: String,
    /// Host path or device; `None` for pseudo filesystems.
    pub source: Option<PathBuf>,
    /// Path inside the workload.
    pub destination: PathBuf,
    /// Mount options.
    pub options: Vec<String>,
}

impl Mount {
    /// Creates a bind mount of `source` at `destination`.
    pub fn bind(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, options: &[&str]) -> Self {
        Self {
            kind: "bind".into(),
            source: Some(source.into()),
            destination: destination.into(),
            options: options.iter().map(ToString::to_string).collect(),
        }
    }

    /// Creates a pseudo filesystem mount with no source.
    pub fn pseudo(kind: &str, destination: impl Into<PathBuf>, options: &[&str]) -> Self {
        Self {
            kind: kind.into(),
            source: None,
            destination: destination.into(),
            options: options.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Which namespaces the workload gets of its own.
///
/// A `false` field shares the host's namespace of that kind.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            network: true,
            ipc: true,
            uts: true,
        }
    }
}

/// Resource limits applied to a one-shot workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Hard memory limit in bytes.
    pub memory_bytes: Option<u64>,
}

/// Everything needed to launch a one-shot workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotSpec {
    /// Workload identifier.
    pub id: String,
    /// Process arguments, program first.
    pub args: Vec<String>,
    /// Root filesystem of the image to run in.
    pub rootfs: PathBuf,
    /// Mounts added on top of the image.
    pub mounts: Vec<Mount>,
    /// Resource limits.
    pub limits: ResourceLimits,
    /// Namespace isolation.
    pub namespaces: NamespaceOptions,
    /// Grants all capabilities and device access.
    pub privileged: bool,
    /// Propagation mode of the root mount.
    pub rootfs_propagation: Option<String>,
}

/// How a one-shot workload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, or `-1` if terminated by a signal.
    pub exit_code: i32,
}

impl RunOutcome {
    /// Returns whether the workload exited with code zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches one-shot workloads and waits for them.
pub trait WorkloadRunner: Send + Sync {
    /// Runs the workload to completion.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Execution`](osd_common::error::OsdError::Execution)
    /// if the workload cannot be launched. A workload that launches and exits
    /// non-zero is reported through [`RunOutcome`], not as an error.
    fn run(&self, spec: &OneShotSpec) -> Result<RunOutcome>;
}
