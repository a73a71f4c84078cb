//! Unified error types for the osd workspace.
//!
//! Every fallible call in the agent resolves to a single [`OsdError`]. The
//! variants follow the failure classes a caller needs to tell apart: an
//! unreachable runtime is not the same thing as a namespace with nothing in
//! it, and a missing log file is not the same thing as a log source that
//! cannot be read at all.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum OsdError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container runtime could not be reached.
    #[error("runtime connection to {endpoint} failed: {message}")]
    Connection {
        /// Address or path of the runtime endpoint.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    /// A runtime call on an established connection failed.
    #[error("runtime call {call} failed: {message}")]
    Runtime {
        /// Name of the runtime operation.
        call: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// A task's metrics attachment could not be decoded into the expected shape.
    #[error("metrics unavailable for {id}: {message}")]
    MetricsDecode {
        /// Workload whose metrics failed to decode.
        id: String,
        /// Description of the decode failure.
        message: String,
    },

    /// No log reader could be constructed for a workload.
    #[error("no log reader found for {id}")]
    NoLogSource {
        /// Workload whose log was requested.
        id: String,
    },

    /// A one-shot workload failed to launch or exited unsuccessfully.
    #[error("one-shot workload {id} failed: {message}")]
    Execution {
        /// Identifier of the one-shot workload.
        id: String,
        /// Description of the failure.
        message: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A malformed frame or unexpected message on the RPC channel.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The agent on the other end of the RPC channel reported an error.
    #[error("remote error ({code}): {message}")]
    Remote {
        /// Numeric wire code, see [`ErrorCode`].
        code: i32,
        /// Error message as reported by the agent.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Coarse error class carried across the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The addressed workload or file does not exist.
    NotFound,
    /// The runtime endpoint could not be reached.
    Unavailable,
    /// The one-shot workload failed.
    Execution,
    /// The request or its parameters were invalid.
    InvalidArgument,
    /// Everything else.
    Internal,
}

impl ErrorCode {
    /// Returns the numeric wire code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::NotFound => 5,
            Self::Unavailable => 14,
            Self::Execution => 9,
            Self::InvalidArgument => 3,
            Self::Internal => 13,
        }
    }

    /// Maps a numeric wire code back to its class.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        match code {
            5 => Self::NotFound,
            14 => Self::Unavailable,
            9 => Self::Execution,
            3 => Self::InvalidArgument,
            _ => Self::Internal,
        }
    }
}

impl OsdError {
    /// Returns the error class reported to remote callers.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } | Self::NoLogSource { .. } => ErrorCode::NotFound,
            Self::Connection { .. } => ErrorCode::Unavailable,
            Self::Execution { .. } => ErrorCode::Execution,
            Self::Config { .. } | Self::Protocol { .. } => ErrorCode::InvalidArgument,
            Self::Remote { code, .. } => ErrorCode::from_i32(*code),
            Self::Io { .. }
            | Self::Runtime { .. }
            | Self::MetricsDecode { .. }
            | Self::PermissionDenied { .. }
            | Self::Serialization { .. } => ErrorCode::Internal,
        }
    }

    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, OsdError>;
