//! `osd kill` — Send SIGTERM to a workload.

use clap::Args;
use osd_common::types::{Namespace, WorkloadId};
use osd_rpc::Client;

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Workload ID.
    pub id: String,

    /// Namespace of the workload.
    #[arg(short, long, default_value = "default")]
    pub namespace: String,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the agent rejects the request.
pub async fn execute(args: KillArgs, client: &Client) -> anyhow::Result<()> {
    let id = WorkloadId::new(args.id);
    client
        .terminate(Namespace::new(args.namespace), id.clone())
        .await?;
    println!("{id}");
    Ok(())
}
