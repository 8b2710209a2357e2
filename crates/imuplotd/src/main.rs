mod cli;
mod daemon;
mod device;
mod engine;
mod frame;
mod ipc_server;

use clap::{Parser, Subcommand};
use imuplotd_core::sample::ChannelId;

#[derive(Parser)]
#[command(name = "imuplotd", about = "Two-channel sensor chart feed daemon and control tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon (for systemd or manual start)
    Daemon {
        /// Log level (trace, debug, info, warn, error)
        #[arg(long, env = "IMUPLOTD_LOG_LEVEL", default_value = "info")]
        log_level: String,
    },
    /// Show device link and pipeline status
    Status,
    /// Start a measurement run (clears previous data)
    Start,
    /// Stop the measurement run and clear the charts
    Stop,
    /// Connect the device link
    Connect,
    /// Disconnect the device link
    Disconnect,
    /// Print a channel's display window
    Window {
        /// Channel name (sensor1, sensor2)
        #[arg(value_parser = parse_channel)]
        channel: ChannelId,
        /// Only print the newest N points
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print current config as TOML
    Show,
    /// Reload config from disk
    Reload,
    /// Print config directory path
    Dir,
}

fn parse_channel(s: &str) -> Result<ChannelId, String> {
    ChannelId::from_config_key(s)
        .ok_or_else(|| format!("unknown channel '{s}' (expected sensor1 or sensor2)"))
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => {
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            println!();
            std::process::exit(0);
        }
        // The daemon builds a multi-thread runtime; a CLI command is one IPC
        // round-trip on a single thread.
        Some(Commands::Daemon { log_level }) => daemon::run(&log_level),
        Some(cmd) => match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(cli::run(cmd)),
            Err(e) => Err(anyhow::Error::new(e).context("failed to create tokio runtime")),
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
