use std::path::PathBuf;
use std::time::Duration;

use imuplotd_core::config::Config;
use imuplotd_core::ipc::{DeviceStatus, IpcRequest, IpcResponse};
use imuplotd_core::pipeline::{Pipeline, PipelineSettings, PollOutcome};
use imuplotd_core::source::SampleSource;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::DeviceCommand;

/// An IPC request bundled with its reply channel.
pub struct IpcMessage {
    pub request: IpcRequest,
    pub reply_tx: oneshot::Sender<IpcResponse>,
}

/// All channel endpoints consumed by the engine.
pub struct EngineChannels {
    pub ipc_request_rx: mpsc::Receiver<IpcMessage>,
    pub device_cmd_tx: mpsc::Sender<DeviceCommand>,
    pub device_connected_rx: watch::Receiver<bool>,
}

/// Mutable state owned by the engine loop.
struct EngineState {
    config: Config,
    config_path: PathBuf,
    pipeline: Pipeline,
    device_connected: bool,
}

impl EngineState {
    fn new(config: Config, config_path: PathBuf) -> Self {
        let pipeline = Pipeline::new(PipelineSettings::from(&config.pipeline));
        Self {
            config,
            config_path,
            pipeline,
            device_connected: false,
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

async fn send_device(tx: &mpsc::Sender<DeviceCommand>, cmd: DeviceCommand) {
    if tx.send(cmd).await.is_err() {
        warn!("device command {cmd:?} dropped: device channel closed");
    }
}

/// Central engine loop.
///
/// Owns the pipeline. Poll ticks run only while measuring and frame ticks
/// only while the flusher is armed, so both sit idle between runs.
pub async fn run<S: SampleSource>(
    config: Config,
    config_path: PathBuf,
    source: S,
    channels: EngineChannels,
    cancel: CancellationToken,
) {
    let EngineChannels {
        mut ipc_request_rx,
        device_cmd_tx,
        mut device_connected_rx,
    } = channels;
    let mut state = EngineState::new(config, config_path);
    let mut poll_timer = ticker(state.config.pipeline.poll_interval());
    let mut frame_timer = ticker(state.config.pipeline.frame_interval());
    let mut device_link_open = true;

    info!("engine started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("engine received shutdown signal");
                break;
            }

            _ = poll_timer.tick(), if state.pipeline.is_measuring() => {
                log_poll(state.pipeline.poll(&source));
            }

            _ = frame_timer.tick(), if state.pipeline.flush_armed() => {
                state.pipeline.flush();
            }

            Some(msg) = ipc_request_rx.recv() => {
                let was_measuring = state.pipeline.is_measuring();
                let is_reload = matches!(msg.request, IpcRequest::ReloadConfig);
                let response = handle_ipc_request(msg.request, &mut state, &source, &device_cmd_tx, &cancel).await;
                if is_reload && response == IpcResponse::Ok {
                    poll_timer = ticker(state.config.pipeline.poll_interval());
                    frame_timer = ticker(state.config.pipeline.frame_interval());
                } else if !was_measuring && state.pipeline.is_measuring() {
                    // First poll one interval after start, not immediately.
                    poll_timer.reset();
                }
                // Client may have disconnected; reply is best-effort.
                let _ = msg.reply_tx.send(response);
            }

            result = device_connected_rx.changed(), if device_link_open => {
                if result.is_err() {
                    warn!("device link closed");
                    device_link_open = false;
                    state.device_connected = false;
                    if state.pipeline.is_measuring() {
                        state.pipeline.reset();
                    }
                    continue;
                }
                let connected = *device_connected_rx.borrow_and_update();
                if connected == state.device_connected {
                    continue;
                }
                state.device_connected = connected;
                if connected {
                    info!("device connected");
                } else {
                    if state.pipeline.is_measuring() {
                        info!("device disconnected, measurement stopped");
                    } else {
                        info!("device disconnected");
                    }
                    state.pipeline.reset();
                }
            }
        }
    }

    info!("engine stopped");
}

fn log_poll(outcome: PollOutcome) {
    match outcome {
        PollOutcome::Accepted { queued, unhashable } => {
            if let Some(e) = unhashable {
                warn!("{e}; poll processed without debounce");
            }
            debug!("poll accepted: queued sensor1={} sensor2={}", queued[0], queued[1]);
        }
        PollOutcome::Debounced => debug!("poll debounced: repeated content"),
        PollOutcome::NoNewData | PollOutcome::Inactive => {}
    }
}

async fn handle_ipc_request<S: SampleSource>(
    request: IpcRequest,
    state: &mut EngineState,
    source: &S,
    device_cmd_tx: &mpsc::Sender<DeviceCommand>,
    cancel: &CancellationToken,
) -> IpcResponse {
    match request {
        IpcRequest::GetStatus => IpcResponse::Status {
            device: DeviceStatus {
                connected: state.device_connected,
            },
            pipeline: state.pipeline.status(),
        },
        IpcRequest::StartMeasurement => {
            if !state.device_connected {
                return IpcResponse::Error {
                    message: "device not connected".into(),
                };
            }
            // The device applies Clear on its own schedule, so history it
            // still holds at the first poll is cut off by the start time.
            let started_at = source.now();
            send_device(device_cmd_tx, DeviceCommand::Clear).await;
            send_device(device_cmd_tx, DeviceCommand::StartStreaming).await;
            state.pipeline = Pipeline::new(PipelineSettings::from(&state.config.pipeline));
            state.pipeline.start_measurement_at(started_at);
            info!("measurement started at {:.1} ms", started_at.millis());
            IpcResponse::Ok
        }
        IpcRequest::StopMeasurement => {
            send_device(device_cmd_tx, DeviceCommand::StopStreaming).await;
            if state.pipeline.is_measuring() {
                info!("measurement stopped");
            }
            state.pipeline.stop_measurement();
            IpcResponse::Ok
        }
        IpcRequest::Connect => {
            send_device(device_cmd_tx, DeviceCommand::Connect).await;
            IpcResponse::Ok
        }
        IpcRequest::Disconnect => {
            send_device(device_cmd_tx, DeviceCommand::Disconnect).await;
            IpcResponse::Ok
        }
        IpcRequest::GetWindow { channel } => IpcResponse::Window {
            channel,
            points: state.pipeline.display_window(channel).snapshot(),
        },
        IpcRequest::GetConfig => match state.config.to_toml() {
            Ok(toml) => IpcResponse::Config { toml },
            Err(e) => IpcResponse::Error {
                message: format!("failed to serialize config: {e}"),
            },
        },
        IpcRequest::ReloadConfig => match Config::load(&state.config_path) {
            Ok(new_config) => {
                state.config = new_config;
                info!("config reloaded from {}", state.config_path.display());
                match state.config.to_toml() {
                    Ok(toml) => debug!("active config:\n{toml}"),
                    Err(e) => warn!("failed to serialize config for logging: {e}"),
                }
                IpcResponse::Ok
            }
            Err(e) => {
                warn!("config reload failed (keeping previous config): {e}");
                IpcResponse::Error {
                    message: format!("failed to reload config: {e}"),
                }
            }
        },
        IpcRequest::Shutdown => {
            cancel.cancel();
            IpcResponse::Ok
        }
    }
}
