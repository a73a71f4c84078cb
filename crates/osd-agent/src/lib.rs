//! # osd-agent
//!
//! The node agent's request handlers, independent of any transport:
//!
//! - [`enumerate`]: best-effort workload listing with live usage.
//! - [`lifecycle`]: terminating a workload and running the reset workload.
//! - [`logs`]: chunked, cancellable streaming of a workload's stdout.
//! - [`oneshot`] and [`oci`]: the run-to-completion contract and its OCI
//!   runtime implementation.
//! - [`agent`]: the async facade the RPC server calls into.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod agent;
pub mod enumerate;
pub mod lifecycle;
pub mod logs;
pub mod oci;
pub mod oneshot;

pub use agent::{Agent, LogStreamHandle};
