use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use imuplotd_core::config::DeviceConfig;
use imuplotd_core::sample::{AbsoluteTime, ChannelId, Sample};
use imuplotd_core::source::{DeviceBuffer, SampleSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Commands sent from the engine to the device thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Connect,
    Disconnect,
    StartStreaming,
    StopStreaming,
    /// Drop the buffered sample history.
    Clear,
}

/// Millisecond clock shared by the device thread and the poller, so sample
/// timestamps and debounce ages are on one scale.
#[derive(Debug, Clone, Copy)]
pub struct LinkClock {
    epoch: Instant,
}

impl LinkClock {
    pub fn new() -> Self {
        LinkClock {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> AbsoluteTime {
        AbsoluteTime::from_millis(self.epoch.elapsed().as_secs_f64() * 1000.0)
    }
}

impl Default for LinkClock {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBuffer = Arc<Mutex<DeviceBuffer>>;

fn lock(buffer: &SharedBuffer) -> std::sync::MutexGuard<'_, DeviceBuffer> {
    // The buffer holds plain data, so a panicked writer leaves it usable.
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The engine's view of the device: snapshots of the shared buffer.
#[derive(Debug, Clone)]
pub struct SharedSource {
    buffer: SharedBuffer,
    clock: LinkClock,
}

impl SharedSource {
    pub fn new(buffer: SharedBuffer, clock: LinkClock) -> Self {
        SharedSource { buffer, clock }
    }
}

impl SampleSource for SharedSource {
    fn channel_samples(&self, channel: ChannelId) -> Vec<Sample> {
        lock(&self.buffer).snapshot(channel)
    }

    fn now(&self) -> AbsoluteTime {
        self.clock.now()
    }
}

/// Connection and streaming state of the simulated link.
struct Link {
    connected: bool,
    streaming: bool,
    value_max: f64,
    rng: StdRng,
}

impl Link {
    fn new(value_max: f64, rng: StdRng) -> Self {
        Link {
            connected: false,
            streaming: false,
            value_max,
            rng,
        }
    }

    fn apply(&mut self, cmd: DeviceCommand, buffer: &SharedBuffer) {
        match cmd {
            DeviceCommand::Connect => self.connected = true,
            DeviceCommand::Disconnect => {
                self.connected = false;
                self.streaming = false;
            }
            DeviceCommand::StartStreaming => {
                if self.connected {
                    self.streaming = true;
                } else {
                    debug!("ignoring start streaming while disconnected");
                }
            }
            DeviceCommand::StopStreaming => self.streaming = false,
            DeviceCommand::Clear => lock(buffer).clear(),
        }
    }

    fn next_value(&mut self) -> f64 {
        if self.value_max > 0.0 {
            self.rng.gen_range(0.0..self.value_max)
        } else {
            0.0
        }
    }

    /// Append one sample per channel if streaming.
    fn tick(&mut self, buffer: &SharedBuffer, now: AbsoluteTime) {
        if !(self.connected && self.streaming) {
            return;
        }
        let values = ChannelId::ALL.map(|_| self.next_value());
        let mut buf = lock(buffer);
        for (channel, value) in ChannelId::ALL.into_iter().zip(values) {
            buf.push(channel, Sample::new(now.millis(), value));
        }
    }
}

/// Device thread loop.
///
/// Applies queued commands, then emits one sample per channel every
/// `sample_interval` while connected and streaming. Connection changes are
/// published on `connected_tx`.
pub fn run(
    config: DeviceConfig,
    buffer: SharedBuffer,
    clock: LinkClock,
    mut cmd_rx: mpsc::Receiver<DeviceCommand>,
    connected_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let interval = config.sample_interval();
    let mut link = Link::new(config.value_max, StdRng::from_entropy());
    let mut next_tick = Instant::now() + interval;

    info!(
        "device link ready (sample interval {} ms, history {})",
        interval.as_millis(),
        config.history_limit
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    debug!("device command: {cmd:?}");
                    link.apply(cmd, &buffer);
                    connected_tx.send_if_modified(|current| {
                        if *current != link.connected {
                            *current = link.connected;
                            true
                        } else {
                            false
                        }
                    });
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    info!("device command channel closed");
                    return;
                }
            }
        }

        link.tick(&buffer, clock.now());

        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
            next_tick += interval;
        } else {
            // Fell behind: restart the cadence from now.
            next_tick = now + interval;
        }
    }

    let _ = connected_tx.send(false);
    info!("device thread exiting");
}
