//! Container runtime boundary for the osd agent.
//!
//! - [`client`]: namespace-scoped runtime operations and the per-call
//!   connection guard.
//! - [`metrics`]: two-step decoding of type-tagged metrics attachments.
//! - [`local`]: adapter for a runtime that exports its state as a JSON index.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod local;
pub mod metrics;

pub use client::{RuntimeClient, RuntimeConnector, ScopedClient, Task, Workload};
pub use metrics::{MetricsError, MetricsPayload, TypedMetrics};
