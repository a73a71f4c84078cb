//! # osd-rpc
//!
//! Local RPC surface of the node agent: a length-prefixed frame protocol
//! over a Unix socket, the server that dispatches it to an
//! [`osd_agent::Agent`], and a client for the command line.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{Client, LogReader};
pub use server::Server;
