use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use imuplotd_core::config::{self, Config};
use imuplotd_core::ipc;
use imuplotd_core::source::DeviceBuffer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::device::{self, LinkClock, SharedSource};
use crate::{engine, ipc_server};

/// Run the daemon with the given log level.
pub fn run(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("imuplotd v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = Config::default_path().context("failed to resolve XDG config directory")?;
    match config::bootstrap_config(&config_path) {
        Ok(true) => info!("created default config at {}", config_path.display()),
        Ok(false) => {}
        Err(e) => warn!("failed to bootstrap config: {e}"),
    }

    let config = Config::load(&config_path).context("failed to load config")?;
    info!("loaded config from {}", config_path.display());
    match config.to_toml() {
        Ok(toml) => info!("active config:\n{toml}"),
        Err(e) => warn!("failed to serialize config for logging: {e}"),
    }

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let result = rt.block_on(async_main(config, config_path));
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(config: Config, config_path: PathBuf) -> Result<()> {
    let cancel = CancellationToken::new();

    let socket_path = ipc::default_socket_path();
    ipc_server::cleanup_stale_socket(&socket_path).await?;

    let (device_cmd_tx, device_cmd_rx) = tokio::sync::mpsc::channel(16);
    let (device_connected_tx, device_connected_rx) = tokio::sync::watch::channel(false);
    let (ipc_request_tx, ipc_request_rx) = tokio::sync::mpsc::channel(8);

    let buffer = Arc::new(Mutex::new(DeviceBuffer::new(config.device.history_limit)));
    let clock = LinkClock::new();
    let source = SharedSource::new(buffer.clone(), clock);

    // Device link (std::thread: paced with blocking sleeps)
    let device_config = config.device.clone();
    let device_cancel = cancel.clone();
    let device_join = std::thread::Builder::new()
        .name("device".into())
        .spawn(move || {
            device::run(
                device_config,
                buffer,
                clock,
                device_cmd_rx,
                device_connected_tx,
                device_cancel,
            );
        })
        .context("failed to spawn device thread")?;

    let ipc_cancel = cancel.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::run(socket_path, ipc_request_tx, ipc_cancel).await {
            error!("IPC server failed: {e:#}");
        }
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("signal handling failed: {e:#}");
            return;
        }
        signal_cancel.cancel();
    });

    let channels = engine::EngineChannels {
        ipc_request_rx,
        device_cmd_tx,
        device_connected_rx,
    };
    engine::run(config, config_path, source, channels, cancel.clone()).await;

    info!("engine stopped, shutting down subsystems");
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        let _ = tokio::task::spawn_blocking(move || device_join.join()).await;
    })
    .await;

    let _ = tokio::time::timeout(Duration::from_millis(200), ipc_handle).await;

    let _ = tokio::fs::remove_file(ipc::default_socket_path()).await;

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}
