use crate::sample::{AbsoluteTime, ChannelId, Sample};

/// Something the pipeline can poll for raw samples.
///
/// The returned arrays carry no index stability: the owner may prune or
/// replace them between calls. Only sample content and timestamps are
/// trusted.
pub trait SampleSource {
    /// Current full sample array for `channel`, oldest first.
    fn channel_samples(&self, channel: ChannelId) -> Vec<Sample>;

    /// Monotonic clock reading on the same scale as sample timestamps.
    fn now(&self) -> AbsoluteTime;
}

/// In-memory source with a settable clock, for tests and playback.
#[derive(Debug, Default, Clone)]
pub struct ManualSource {
    channels: [Vec<Sample>; ChannelId::COUNT],
    now: f64,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, channel: ChannelId, sample: Sample) {
        self.channels[channel.index()].push(sample);
    }

    /// Replace a channel's whole array, e.g. with a shorter suffix to
    /// simulate pruning.
    pub fn set_samples(&mut self, channel: ChannelId, samples: Vec<Sample>) {
        self.channels[channel.index()] = samples;
    }

    /// Drop all but the newest `keep` samples of a channel.
    pub fn prune_to(&mut self, channel: ChannelId, keep: usize) {
        let buf = &mut self.channels[channel.index()];
        let excess = buf.len().saturating_sub(keep);
        buf.drain(..excess);
    }

    pub fn set_now(&mut self, ms: f64) {
        self.now = ms;
    }

    pub fn advance(&mut self, ms: f64) {
        self.now += ms;
    }
}

impl SampleSource for ManualSource {
    fn channel_samples(&self, channel: ChannelId) -> Vec<Sample> {
        self.channels[channel.index()].clone()
    }

    fn now(&self) -> AbsoluteTime {
        AbsoluteTime::from_millis(self.now)
    }
}

/// Device-side sample history, pruned from the front on every push.
///
/// This is the owner-side behaviour the pipeline has to tolerate: array
/// length shrinks back to `history_limit` as new samples arrive, so positions
/// shift between polls.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    channels: [Vec<Sample>; ChannelId::COUNT],
    history_limit: usize,
}

impl DeviceBuffer {
    pub fn new(history_limit: usize) -> Self {
        DeviceBuffer {
            channels: Default::default(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn push(&mut self, channel: ChannelId, sample: Sample) {
        let buf = &mut self.channels[channel.index()];
        buf.push(sample);
        if buf.len() > self.history_limit {
            let excess = buf.len() - self.history_limit;
            buf.drain(..excess);
        }
    }

    #[must_use]
    pub fn snapshot(&self, channel: ChannelId) -> Vec<Sample> {
        self.channels[channel.index()].clone()
    }

    #[must_use]
    pub fn len(&self, channel: ChannelId) -> usize {
        self.channels[channel.index()].len()
    }

    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn clear(&mut self) {
        for buf in &mut self.channels {
            buf.clear();
        }
    }
}
