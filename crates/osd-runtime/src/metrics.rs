//! Decoding of task metrics attachments.
//!
//! The runtime hands back metrics as an opaque payload tagged with a type
//! URL. Decoding happens in two explicit steps: the tag selects a concrete
//! [`TypedMetrics`] variant, then [`TypedMetrics::usage`] asserts that the
//! variant carries cgroup CPU and memory figures. Either step can fail
//! without affecting any other workload.

use osd_common::types::ResourceUsage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type URL of cgroup v1 metrics.
pub const CGROUPS_V1_TYPE_URL: &str = "io.containerd.cgroups.v1.Metrics";
/// Type URL of cgroup v2 metrics.
pub const CGROUPS_V2_TYPE_URL: &str = "io.containerd.cgroups.v2.Metrics";
/// Type URL of Windows container statistics.
pub const WINDOWS_STATS_TYPE_URL: &str = "io.containerd.windows.v1.Statistics";

/// Raw, type-tagged metrics attachment of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    /// Type tag identifying how `value` is encoded.
    pub type_url: String,
    /// Encoded metrics value.
    pub value: serde_json::Value,
}

impl MetricsPayload {
    /// Creates a payload from a tag and an encoded value.
    pub fn new(type_url: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// Failure to turn a metrics payload into [`ResourceUsage`].
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The type tag names no known metrics type.
    #[error("unknown metrics type {type_url}")]
    UnknownType {
        /// Tag found on the payload.
        type_url: String,
    },

    /// The value does not decode as the type its tag names.
    #[error("malformed {type_url} payload: {source}")]
    Malformed {
        /// Tag found on the payload.
        type_url: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// The payload decoded but is not cgroup metrics.
    #[error("failed to convert {type_url} metric data to cgroup metrics")]
    TypeMismatch {
        /// Tag found on the payload.
        type_url: &'static str,
    },

    /// A cgroup payload lacks a section needed for extraction.
    #[error("{type_url} payload has no {section} section")]
    MissingSection {
        /// Tag found on the payload.
        type_url: &'static str,
        /// Name of the missing section.
        section: &'static str,
    },
}

/// A metrics payload decoded according to its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedMetrics {
    /// Cgroup v1 controller statistics.
    CgroupV1(v1::Metrics),
    /// Cgroup v2 unified hierarchy statistics.
    CgroupV2(v2::Metrics),
    /// Windows container statistics.
    Windows(windows::Statistics),
}

impl TypedMetrics {
    /// Reconstructs the concrete value named by the payload's tag.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::UnknownType`] for an unrecognized tag and
    /// [`MetricsError::Malformed`] if the value does not match its tag.
    pub fn decode(payload: &MetricsPayload) -> Result<Self, MetricsError> {
        let malformed = |source| MetricsError::Malformed {
            type_url: payload.type_url.clone(),
            source,
        };
        match payload.type_url.as_str() {
            CGROUPS_V1_TYPE_URL => serde_json::from_value(payload.value.clone())
                .map(Self::CgroupV1)
                .map_err(malformed),
            CGROUPS_V2_TYPE_URL => serde_json::from_value(payload.value.clone())
                .map(Self::CgroupV2)
                .map_err(malformed),
            WINDOWS_STATS_TYPE_URL => serde_json::from_value(payload.value.clone())
                .map(Self::Windows)
                .map_err(malformed),
            other => Err(MetricsError::UnknownType {
                type_url: other.to_string(),
            }),
        }
    }

    /// Extracts CPU and memory usage, asserting this is a cgroup shape.
    ///
    /// Values are copied as the runtime reports them.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::TypeMismatch`] for non-cgroup metrics and
    /// [`MetricsError::MissingSection`] if the CPU or memory section is absent.
    pub fn usage(&self) -> Result<ResourceUsage, MetricsError> {
        match self {
            Self::CgroupV1(m) => {
                let cpu = m.cpu.as_ref().ok_or(MetricsError::MissingSection {
                    type_url: CGROUPS_V1_TYPE_URL,
                    section: "cpu",
                })?;
                let memory = m.memory.as_ref().ok_or(MetricsError::MissingSection {
                    type_url: CGROUPS_V1_TYPE_URL,
                    section: "memory",
                })?;
                Ok(ResourceUsage {
                    cpu_total: cpu.usage.total,
                    memory_usage: memory.usage.usage,
                })
            }
            Self::CgroupV2(m) => {
                let cpu = m.cpu.as_ref().ok_or(MetricsError::MissingSection {
                    type_url: CGROUPS_V2_TYPE_URL,
                    section: "cpu",
                })?;
                let memory = m.memory.as_ref().ok_or(MetricsError::MissingSection {
                    type_url: CGROUPS_V2_TYPE_URL,
                    section: "memory",
                })?;
                Ok(ResourceUsage {
                    cpu_total: cpu.usage_usec,
                    memory_usage: memory.usage,
                })
            }
            Self::Windows(_) => Err(MetricsError::TypeMismatch {
                type_url: WINDOWS_STATS_TYPE_URL,
            }),
        }
    }
}

/// Decodes a payload and extracts its resource usage in one step.
///
/// # Errors
///
/// Returns any [`MetricsError`] raised by decoding or extraction.
pub fn decode_usage(payload: &MetricsPayload) -> Result<ResourceUsage, MetricsError> {
    TypedMetrics::decode(payload)?.usage()
}

/// Cgroup v1 metrics shapes.
pub mod v1 {
    use serde::{Deserialize, Serialize};

    /// Per-controller statistics of a v1 cgroup.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Metrics {
        /// `cpuacct` controller statistics.
        pub cpu: Option<CpuStat>,
        /// `memory` controller statistics.
        pub memory: Option<MemoryStat>,
    }

    /// CPU accounting.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CpuStat {
        /// Cumulative usage.
        pub usage: CpuUsage,
    }

    /// Cumulative CPU time in nanoseconds.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CpuUsage {
        /// Total CPU time.
        pub total: u64,
        /// Time spent in kernel mode.
        pub kernel: u64,
        /// Time spent in user mode.
        pub user: u64,
    }

    /// Memory accounting.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MemoryStat {
        /// Usage counters for user memory.
        pub usage: MemoryEntry,
    }

    /// One memory counter group.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MemoryEntry {
        /// Configured limit.
        pub limit: u64,
        /// Current usage in bytes.
        pub usage: u64,
        /// Peak usage in bytes.
        pub max: u64,
    }
}

/// Cgroup v2 metrics shapes.
pub mod v2 {
    use serde::{Deserialize, Serialize};

    /// Statistics of a unified-hierarchy cgroup.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Metrics {
        /// Contents of `cpu.stat`.
        pub cpu: Option<CpuStat>,
        /// Contents of `memory.current` and `memory.stat`.
        pub memory: Option<MemoryStat>,
    }

    /// `cpu.stat` counters.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CpuStat {
        /// Total CPU time in microseconds.
        pub usage_usec: u64,
        /// User CPU time in microseconds.
        pub user_usec: u64,
        /// System CPU time in microseconds.
        pub system_usec: u64,
    }

    /// Memory counters.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MemoryStat {
        /// Current usage in bytes.
        pub usage: u64,
        /// Configured limit in bytes.
        pub usage_limit: u64,
    }
}

/// Windows container statistics shapes.
pub mod windows {
    use serde::{Deserialize, Serialize};

    /// Statistics of a Windows container.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Statistics {
        /// Processor counters.
        pub processor: Option<Processor>,
        /// Memory counters.
        pub memory: Option<Memory>,
    }

    /// Processor counters.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Processor {
        /// Total runtime in nanoseconds.
        pub total_runtime_ns: u64,
    }

    /// Memory counters.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Memory {
        /// Committed bytes.
        pub memory_usage_commit_bytes: u64,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn v1_payload_extracts_total_and_usage() {
        let payload = MetricsPayload::new(
            CGROUPS_V1_TYPE_URL,
            json!({
                "cpu": { "usage": { "total": 123_456_789, "kernel": 1, "user": 2 } },
                "memory": { "usage": { "usage": 4_194_304, "limit": 8_388_608 } }
            }),
        );
        let usage = decode_usage(&payload).expect("decode");
        assert_eq!(usage.cpu_total, 123_456_789);
        assert_eq!(usage.memory_usage, 4_194_304);
    }

    #[test]
    fn v2_payload_passes_units_through() {
        let payload = MetricsPayload::new(
            CGROUPS_V2_TYPE_URL,
            json!({ "cpu": { "usage_usec": 5000 }, "memory": { "usage": 1024 } }),
        );
        let usage = decode_usage(&payload).expect("decode");
        assert_eq!(usage.cpu_total, 5000);
        assert_eq!(usage.memory_usage, 1024);
    }

    #[test]
    fn windows_stats_decode_but_fail_assertion() {
        let payload = MetricsPayload::new(
            WINDOWS_STATS_TYPE_URL,
            json!({ "processor": { "total_runtime_ns": 10 } }),
        );
        let typed = TypedMetrics::decode(&payload).expect("tag is known");
        assert!(matches!(typed, TypedMetrics::Windows(_)));
        assert!(matches!(
            typed.usage(),
            Err(MetricsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let payload = MetricsPayload::new("example.com/Other", json!({}));
        assert!(matches!(
            decode_usage(&payload),
            Err(MetricsError::UnknownType { .. })
        ));
    }

    #[test]
    fn value_not_matching_tag_is_malformed() {
        let payload = MetricsPayload::new(CGROUPS_V1_TYPE_URL, json!({ "cpu": "fast" }));
        assert!(matches!(
            decode_usage(&payload),
            Err(MetricsError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_memory_section_is_reported() {
        let payload = MetricsPayload::new(
            CGROUPS_V1_TYPE_URL,
            json!({ "cpu": { "usage": { "total": 1 } } }),
        );
        let err = decode_usage(&payload).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::MissingSection {
                section: "memory",
                ..
            }
        ));
    }
}
