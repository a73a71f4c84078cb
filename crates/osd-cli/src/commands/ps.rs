//! `osd ps` — List workloads with live usage.

use clap::Args;
use osd_common::types::{Namespace, WorkloadRecord};
use osd_rpc::Client;

use crate::output::memory_cell;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Namespace to list.
    #[arg(short, long, default_value = "default")]
    pub namespace: String,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the agent is unreachable or the listing fails.
pub async fn execute(args: PsArgs, client: &Client) -> anyhow::Result<()> {
    let records = client.list_workloads(Namespace::new(args.namespace)).await?;
    if records.is_empty() {
        println!("No workloads found.");
        return Ok(());
    }
    print!("{}", render_table(&records));
    Ok(())
}

fn render_table(records: &[WorkloadRecord]) -> String {
    let mut out = format!(
        "{:<40} {:<40} {:<10} {:>16} {:>12}\n",
        "WORKLOAD ID", "IMAGE", "STATUS", "CPU", "MEMORY"
    );
    for r in records {
        out.push_str(&format!(
            "{:<40} {:<40} {:<10} {:>16} {:>12}\n",
            r.id,
            r.image,
            r.status,
            r.cpu_usage_total,
            memory_cell(r.memory_usage_bytes)
        ));
    }
    out
}
