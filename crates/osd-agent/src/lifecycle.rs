//! Lifecycle actions: terminating a workload and resetting the node.

use nix::sys::signal::Signal;
use osd_common::config::ResetConfig;
use osd_common::constants::{RESET_COMMAND, RESET_WORKLOAD_ID};
use osd_common::error::{OsdError, Result};
use osd_common::types::{Namespace, WorkloadId};
use osd_runtime::client::RuntimeConnector;

use crate::oneshot::{Mount, NamespaceOptions, OneShotSpec, ResourceLimits, WorkloadRunner};

/// Sends SIGTERM to the task of a workload.
///
/// Returns as soon as the runtime accepts the signal; it does not wait
/// for the task to exit.
///
/// # Errors
///
/// Returns the runtime's error, e.g. [`OsdError::NotFound`] for an unknown
/// workload.
pub fn terminate(connector: &dyn RuntimeConnector, namespace: &Namespace, id: &WorkloadId) -> Result<()> {
    let client = connector.connect(namespace)?;
    client.kill(id, Signal::SIGTERM)?;
    tracing::info!(namespace = %namespace, id = %id, "termination signal sent");
    Ok(())
}

/// Mounts that expose host container, kubelet, and cluster state to the
/// reset workload.
pub fn reset_mounts() -> Vec<Mount> {
    vec![
        Mount::pseudo("cgroup", "/sys/fs/cgroup", &["ro"]),
        Mount::bind("/run", "/var/run", &["rbind", "rshared", "rw"]),
        Mount::bind("/var/lib/docker", "/var/lib/docker", &["rbind", "rshared", "rw"]),
        Mount::bind("/var/lib/kubelet", "/var/lib/kubelet", &["rbind", "rshared", "rw"]),
        Mount::bind("/etc/kubernetes", "/etc/kubernetes", &["bind", "rw"]),
        Mount::bind("/etc/os-release", "/etc/os-release", &["bind", "ro"]),
        Mount::bind("/bin/crictl", "/bin/crictl", &["bind", "ro"]),
        Mount::bind("/bin/kubeadm", "/bin/kubeadm", &["bind", "ro"]),
    ]
}

/// Builds the privileged one-shot workload that resets cluster membership.
pub fn reset_spec(config: &ResetConfig) -> OneShotSpec {
    OneShotSpec {
        id: RESET_WORKLOAD_ID.to_string(),
        args: RESET_COMMAND.iter().map(ToString::to_string).collect(),
        rootfs: config.rootfs.clone(),
        mounts: reset_mounts(),
        limits: ResourceLimits {
            memory_bytes: Some(config.memory_limit_bytes),
        },
        namespaces: NamespaceOptions::default(),
        privileged: true,
        rootfs_propagation: Some("slave".into()),
    }
}

/// Runs the reset workload and waits for it to exit.
///
/// # Errors
///
/// Returns [`OsdError::Execution`] if the workload fails to launch or exits
/// with a non-zero code.
pub fn reset(runner: &dyn WorkloadRunner, config: &ResetConfig) -> Result<()> {
    let spec = reset_spec(config);
    tracing::info!(id = %spec.id, args = ?spec.args, "running reset workload");
    let outcome = runner.run(&spec)?;
    if !outcome.success() {
        return Err(OsdError::Execution {
            id: spec.id,
            message: format!("exited with code {}", outcome.exit_code),
        });
    }
    tracing::info!(id = %spec.id, "reset workload completed");
    Ok(())
}
