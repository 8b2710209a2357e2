mod config;
mod measure;
mod status;
mod window;

use anyhow::{Context, Result};
use imuplotd_core::ipc::{self, IpcRequest, IpcResponse};
use tokio::net::UnixStream;

use crate::frame::{read_frame, write_frame};
use crate::Commands;

/// Run a CLI command by sending an IPC request to the daemon.
pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Status => status::run().await,
        Commands::Start => measure::run(IpcRequest::StartMeasurement, "Measurement started.").await,
        Commands::Stop => measure::run(IpcRequest::StopMeasurement, "Measurement stopped.").await,
        Commands::Connect => measure::run(IpcRequest::Connect, "Connect requested.").await,
        Commands::Disconnect => measure::run(IpcRequest::Disconnect, "Disconnect requested.").await,
        Commands::Window { channel, tail } => window::run(channel, tail).await,
        Commands::Config { command } => config::run(command).await,
        Commands::Daemon { .. } => unreachable!("daemon command handled in main"),
    }
}

fn check_response(resp: IpcResponse) -> Result<IpcResponse> {
    match resp {
        IpcResponse::Error { message } => anyhow::bail!("{message}"),
        other => Ok(other),
    }
}

async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let socket_path = ipc::default_socket_path();

    let mut stream = UnixStream::connect(&socket_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::ConnectionRefused
            || e.kind() == std::io::ErrorKind::NotFound
        {
            anyhow::anyhow!(
                "Could not connect to imuplotd daemon.\n\
                 Is it running? Try: imuplotd daemon"
            )
        } else {
            anyhow::anyhow!("failed to connect to daemon: {e}")
        }
    })?;

    write_frame(&mut stream, &request).await?;
    read_frame(&mut stream)
        .await?
        .context("daemon closed the connection without replying")
}
