//! CLI command definitions and dispatch.

pub mod kill;
pub mod logs;
pub mod ps;
pub mod reset;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use osd_common::constants::DEFAULT_SOCKET_PATH;
use osd_rpc::Client;

/// osd — node-local agent for containerized workloads.
#[derive(Parser, Debug)]
#[command(name = "osd", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path of the agent socket [default: /run/osd/osd.sock].
    #[arg(long, global = true, env = "OSD_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent.
    Serve(serve::ServeArgs),
    /// List workloads in a namespace with live usage.
    Ps(ps::PsArgs),
    /// Stream a workload's stdout.
    Logs(logs::LogsArgs),
    /// Send SIGTERM to a workload.
    Kill(kill::KillArgs),
    /// Run the node reset workload.
    Reset,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let client = || {
        Client::new(
            cli.socket
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
        )
    };
    match cli.command {
        Command::Serve(args) => serve::execute(args, cli.socket.clone()).await,
        Command::Ps(args) => ps::execute(args, &client()).await,
        Command::Logs(args) => logs::execute(args, &client()).await,
        Command::Kill(args) => kill::execute(args, &client()).await,
        Command::Reset => reset::execute(&client()).await,
    }
}
