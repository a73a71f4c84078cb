//! Domain primitive types used across the osd workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical partition under which the runtime groups workloads.
///
/// The agent never validates a namespace; an unknown one simply yields
/// an empty enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Creates a namespace from a string value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a workload within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    /// Creates a workload ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workload's task as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task has been created but not started.
    Created,
    /// Task is actively running.
    Running,
    /// Task has exited.
    Stopped,
    /// Task is frozen.
    Paused,
    /// Task is being frozen.
    Pausing,
    /// The runtime could not determine the status.
    Unknown,
}

impl TaskStatus {
    /// Returns the wire string for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Pausing => "pausing",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and memory figures extracted from a task's metrics attachment.
///
/// Units belong to the runtime and are passed through unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Cumulative CPU time.
    pub cpu_total: u64,
    /// Current memory usage in bytes.
    pub memory_usage: u64,
}

/// Snapshot of one workload as returned by an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    /// Namespace the workload was listed under.
    pub namespace: Namespace,
    /// Workload identifier.
    pub id: WorkloadId,
    /// Name of the image the workload was created from.
    pub image: String,
    /// Task status string, e.g. `running`.
    pub status: String,
    /// Cumulative CPU time; zero unless running with decodable metrics.
    pub cpu_usage_total: u64,
    /// Memory usage in bytes; zero unless running with decodable metrics.
    pub memory_usage_bytes: u64,
}

impl WorkloadRecord {
    /// Creates a record without resource usage.
    #[must_use]
    pub fn new(namespace: Namespace, id: WorkloadId, image: String, status: &TaskStatus) -> Self {
        Self {
            namespace,
            id,
            image,
            status: status.to_string(),
            cpu_usage_total: 0,
            memory_usage_bytes: 0,
        }
    }

    /// Fills in the resource usage fields.
    #[must_use]
    pub const fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.cpu_usage_total = usage.cpu_total;
        self.memory_usage_bytes = usage.memory_usage;
        self
    }
}

/// A bounded piece of a workload's output log.
///
/// Chunks of one stream arrive in file-offset order; their boundaries
/// carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    /// Raw bytes read from the log file.
    pub bytes: Vec<u8>,
}

impl LogChunk {
    /// Wraps raw bytes as a chunk.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the number of bytes in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns whether the chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
