//! `osd logs` — Stream a workload's stdout to the terminal.

use clap::Args;
use osd_common::types::{Namespace, WorkloadId};
use osd_rpc::Client;
use tokio::io::AsyncWriteExt;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Workload ID.
    pub id: String,

    /// Namespace of the workload.
    #[arg(short, long, default_value = "default")]
    pub namespace: String,
}

/// Executes the `logs` command.
///
/// Chunks are written to stdout as they arrive. Interrupting the command
/// closes the connection, which stops the agent's reader.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or the stream breaks.
pub async fn execute(args: LogsArgs, client: &Client) -> anyhow::Result<()> {
    let mut reader = client
        .stream_log(Namespace::new(args.namespace), WorkloadId::new(args.id))
        .await?;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = reader.next_chunk().await? {
        stdout.write_all(&chunk.bytes).await?;
    }
    stdout.flush().await?;
    Ok(())
}
