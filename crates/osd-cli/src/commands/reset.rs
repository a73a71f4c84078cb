//! `osd reset` — Run the node reset workload.

use osd_rpc::Client;

/// Executes the `reset` command and waits for the workload to exit.
///
/// # Errors
///
/// Returns an error if the reset workload fails.
pub async fn execute(client: &Client) -> anyhow::Result<()> {
    tracing::info!("running node reset");
    client.reset().await?;
    println!("node reset complete");
    Ok(())
}
