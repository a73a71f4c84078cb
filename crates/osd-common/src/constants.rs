//! System-wide constants and default paths.

/// Default path of the agent's RPC socket.
pub const DEFAULT_SOCKET_PATH: &str = "/run/osd/osd.sock";

/// Default root of the runtime's exported state index.
pub const DEFAULT_RUNTIME_ROOT: &str = "/run/osd/runtime";

/// Default directory holding per-run OCI bundles for one-shot workloads.
pub const DEFAULT_BUNDLE_DIR: &str = "/run/osd/bundles";

/// Default root filesystem for the reset workload.
pub const DEFAULT_RESET_ROOTFS: &str = "/var/lib/osd/images/kubernetes/rootfs";

/// Default OCI runtime binary used to launch one-shot workloads.
pub const DEFAULT_OCI_RUNTIME: &str = "runc";

/// Size of each log chunk sent to a streaming caller.
pub const DEFAULT_LOG_CHUNK_SIZE: usize = 1024;

/// Number of chunks buffered between the log reader and the socket writer.
pub const DEFAULT_STREAM_BUFFER: usize = 8;

/// Memory limit applied to the reset workload (512 MB).
pub const RESET_MEMORY_LIMIT_BYTES: u64 = 1_000_000 * 512;

/// Identifier of the reset workload.
pub const RESET_WORKLOAD_ID: &str = "reset";

/// Command run by the reset workload.
pub const RESET_COMMAND: &[&str] = &["/bin/kubeadm", "reset", "--force"];

/// Largest frame accepted on the RPC socket.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Lock file inside the runtime root held for the lifetime of a connection.
pub const RUNTIME_LOCK_FILE: &str = ".lock";
