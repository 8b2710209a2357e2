use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::dedup::{collapse_consecutive, CollapseMode, DedupError, PollDebouncer, PollKey, Verdict};
use crate::queue::{flush_batch_size, OutputQueue};
use crate::sample::{AbsoluteTime, ChannelId, ChartPoint, Sample};
use crate::session::SessionClock;
use crate::source::SampleSource;
use crate::watermark::Watermark;
use crate::window::DisplayWindow;

/// Tunables for a [`Pipeline`], already clamped to usable values.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub window_capacity: usize,
    /// Monotonic-clamp nudge in session seconds.
    pub epsilon: f64,
    pub debounce_ms: u64,
    pub hash_history_limit: usize,
    pub base_flush: usize,
    pub max_flush: usize,
    pub collapse: CollapseMode,
}

impl PipelineSettings {
    pub const DEFAULT_EPSILON: f64 = 0.0005;
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        let base_flush = config.base_flush.max(1);
        let epsilon = if config.clamp_epsilon_ms.is_finite() && config.clamp_epsilon_ms > 0.0 {
            config.clamp_epsilon_ms / 1000.0
        } else {
            Self::DEFAULT_EPSILON
        };
        PipelineSettings {
            window_capacity: config.window_capacity.max(1),
            epsilon,
            debounce_ms: config.debounce_ms,
            hash_history_limit: config.hash_history_limit.max(1),
            base_flush,
            max_flush: config.max_flush.max(base_flush),
            collapse: config.collapse,
        }
    }
}

/// Per-channel ingestion state. Never shared between channels.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub watermark: Watermark,
    pub queue: OutputQueue,
}

impl ChannelState {
    fn reset(&mut self) {
        self.watermark.reset();
        self.queue.clear();
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Measurement is not running.
    Inactive,
    /// Nothing newer than the watermarks.
    NoNewData,
    /// The whole poll repeated content seen within the debounce window.
    Debounced,
    Accepted {
        /// Points queued per channel, indexed by [`ChannelId::index`].
        queued: [usize; ChannelId::COUNT],
        /// Set when the poll could not be hashed and went through without
        /// debounce protection.
        unhashable: Option<DedupError>,
    },
}

/// What the host should do after a flush step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStep {
    /// Work remains: call `flush` again on the next frame.
    Continue,
    /// Queues are empty; the flusher is disarmed until a poll queues points.
    Idle,
}

/// Diagnostics for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: ChannelId,
    pub watermark_ms: Option<f64>,
    pub queued: usize,
    pub displayed: usize,
    pub last_time: Option<f64>,
}

/// Diagnostics for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub measuring: bool,
    pub flush_armed: bool,
    pub session_start_ms: Option<f64>,
    pub channels: Vec<ChannelStatus>,
}

/// Turns polled device arrays into bounded, strictly increasing chart windows.
///
/// Stages per poll: watermark filter -> poll debounce -> session anchoring ->
/// consecutive collapse -> relative time -> queue. Per frame: adaptive batch
/// from each queue -> display window append with monotonic clamp.
///
/// All state is owned here and mutated through `&mut self`; the host runs
/// `poll` and `flush` from a single task so they never overlap.
#[derive(Debug)]
pub struct Pipeline {
    settings: PipelineSettings,
    channels: [ChannelState; ChannelId::COUNT],
    windows: [DisplayWindow; ChannelId::COUNT],
    session: SessionClock,
    debouncer: PollDebouncer,
    measuring: bool,
    flush_armed: bool,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let windows = [
            DisplayWindow::new(settings.window_capacity, settings.epsilon),
            DisplayWindow::new(settings.window_capacity, settings.epsilon),
        ];
        let debouncer = PollDebouncer::new(settings.debounce_ms, settings.hash_history_limit);
        Pipeline {
            settings,
            channels: Default::default(),
            windows,
            session: SessionClock::Unset,
            debouncer,
            measuring: false,
            flush_armed: false,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// True while queued points are waiting for frame flushes.
    #[must_use]
    pub fn flush_armed(&self) -> bool {
        self.flush_armed
    }

    /// Begin a new measurement run from a clean slate.
    pub fn start_measurement(&mut self) {
        self.clear();
        self.measuring = true;
    }

    /// Begin a new run that only accepts samples stamped after `start`.
    ///
    /// The device may still hold the previous run's history when the first
    /// poll arrives; seeding the watermarks keeps it out of the new session.
    pub fn start_measurement_at(&mut self, start: AbsoluteTime) {
        self.start_measurement();
        for state in &mut self.channels {
            state.watermark.advance(start);
        }
    }

    /// End the run. Clears every piece of session state in one step, so no
    /// point queued in this run can reach a window afterwards.
    pub fn stop_measurement(&mut self) {
        self.clear();
        self.measuring = false;
    }

    /// Drop all state after the source went away.
    pub fn reset(&mut self) {
        self.stop_measurement();
    }

    fn clear(&mut self) {
        for state in &mut self.channels {
            state.reset();
        }
        for window in &mut self.windows {
            window.clear();
        }
        self.session.reset();
        self.debouncer.clear();
        self.flush_armed = false;
    }

    /// Read both channels from `source` and ingest whatever is newer than
    /// their watermarks.
    pub fn poll<S: SampleSource + ?Sized>(&mut self, source: &S) -> PollOutcome {
        if !self.measuring {
            return PollOutcome::Inactive;
        }
        let fresh = ChannelId::ALL.map(|channel| {
            self.channels[channel.index()]
                .watermark
                .filter_new(&source.channel_samples(channel))
        });
        self.ingest(fresh, source.now())
    }

    /// Ingest one poll's new samples, indexed by [`ChannelId::index`].
    ///
    /// Expects samples already past the watermark filter; `poll` does that.
    /// Since the poll key covers timestamps and the watermark moves past every
    /// accepted one, a replayed device array ends at the watermark as
    /// `NoNewData` through `poll`. The debounce verdict only fires for callers
    /// that feed `ingest` directly.
    pub fn ingest(
        &mut self,
        fresh: [Vec<Sample>; ChannelId::COUNT],
        now: AbsoluteTime,
    ) -> PollOutcome {
        if !self.measuring {
            return PollOutcome::Inactive;
        }
        if fresh.iter().all(Vec::is_empty) {
            return PollOutcome::NoNewData;
        }

        let unhashable = match PollKey::from_batches(&[fresh[0].as_slice(), fresh[1].as_slice()]) {
            Ok(key) => {
                if self.debouncer.check(key, now) == Verdict::Echo {
                    return PollOutcome::Debounced;
                }
                None
            }
            Err(e) => Some(e),
        };

        if let Some(first) = earliest_timestamp(fresh.iter().flatten()) {
            self.session.anchor(first);
        }

        let mut queued = [0usize; ChannelId::COUNT];
        for channel in ChannelId::ALL {
            let i = channel.index();
            let batch = &fresh[i];
            let Some(newest) = batch.iter().map(|s| s.timestamp).reduce(AbsoluteTime::max) else {
                continue;
            };
            let state = &mut self.channels[i];
            for sample in collapse_consecutive(batch, self.settings.collapse) {
                let Some(time) = self.session.relative_seconds(sample.timestamp) else {
                    continue;
                };
                if state.queue.push(ChartPoint::new(time, sample.value)) {
                    queued[i] += 1;
                }
            }
            state.watermark.advance(newest);
        }

        if queued.iter().any(|&n| n > 0) {
            self.flush_armed = true;
        }
        PollOutcome::Accepted { queued, unhashable }
    }

    /// One render-paced flush step: move an adaptive batch from each queue
    /// into its display window.
    pub fn flush(&mut self) -> FlushStep {
        if !self.flush_armed {
            return FlushStep::Idle;
        }
        for channel in ChannelId::ALL {
            let i = channel.index();
            let queue = &mut self.channels[i].queue;
            let n = flush_batch_size(queue.len(), self.settings.base_flush, self.settings.max_flush);
            if n == 0 {
                continue;
            }
            let chunk = queue.drain_front(n);
            self.windows[i].append(chunk);
        }

        if self.channels.iter().any(|c| !c.queue.is_empty()) {
            FlushStep::Continue
        } else {
            self.flush_armed = false;
            FlushStep::Idle
        }
    }

    #[must_use]
    pub fn display_window(&self, channel: ChannelId) -> &DisplayWindow {
        &self.windows[channel.index()]
    }

    #[must_use]
    pub fn channel_state(&self, channel: ChannelId) -> &ChannelState {
        &self.channels[channel.index()]
    }

    #[must_use]
    pub fn session(&self) -> SessionClock {
        self.session
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            measuring: self.measuring,
            flush_armed: self.flush_armed,
            session_start_ms: self.session.start().map(AbsoluteTime::millis),
            channels: ChannelId::ALL
                .iter()
                .map(|&channel| {
                    let state = &self.channels[channel.index()];
                    let window = &self.windows[channel.index()];
                    ChannelStatus {
                        channel,
                        watermark_ms: state.watermark.get().map(AbsoluteTime::millis),
                        queued: state.queue.len(),
                        displayed: window.len(),
                        last_time: window.last().map(|p| p.time),
                    }
                })
                .collect(),
        }
    }
}

fn earliest_timestamp<'a>(samples: impl Iterator<Item = &'a Sample>) -> Option<AbsoluteTime> {
    samples
        .map(|s| s.timestamp)
        .filter(|t| t.is_finite())
        .min_by(|a, b| a.millis().total_cmp(&b.millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ManualSource;

    const S1: ChannelId = ChannelId::Sensor1;
    const S2: ChannelId = ChannelId::Sensor2;

    fn started() -> Pipeline {
        let mut p = Pipeline::new(PipelineSettings::default());
        p.start_measurement();
        p
    }

    fn drain(p: &mut Pipeline) -> usize {
        let mut frames = 0;
        while p.flush() == FlushStep::Continue {
            frames += 1;
            assert!(frames < 10_000, "flusher never went idle");
        }
        frames + 1
    }

    fn values(p: &Pipeline, channel: ChannelId) -> Vec<f64> {
        p.display_window(channel).points().map(|pt| pt.value).collect()
    }

    fn times(p: &Pipeline, channel: ChannelId) -> Vec<f64> {
        p.display_window(channel).points().map(|pt| pt.time).collect()
    }

    fn queued(outcome: &PollOutcome) -> [usize; 2] {
        match outcome {
            PollOutcome::Accepted { queued, .. } => *queued,
            other => panic!("expected accepted poll, got {other:?}"),
        }
    }

    #[test]
    fn inactive_before_start() {
        let mut p = Pipeline::new(PipelineSettings::default());
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(0.0, 1.0));
        assert_eq!(p.poll(&src), PollOutcome::Inactive);
        assert_eq!(p.flush(), FlushStep::Idle);
    }

    #[test]
    fn empty_source_is_no_new_data() {
        let mut p = started();
        let src = ManualSource::new();
        assert_eq!(p.poll(&src), PollOutcome::NoNewData);
        assert!(!p.flush_armed());
    }

    #[test]
    fn session_zeroes_on_first_sample() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(1000.0, 1.0));
        src.push(S1, Sample::new(1500.0, 2.0));
        p.poll(&src);
        drain(&mut p);
        assert_eq!(times(&p, S1), vec![0.0, 0.5]);
    }

    #[test]
    fn session_start_is_min_across_channels() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(1200.0, 1.0));
        src.push(S2, Sample::new(1000.0, 9.0));
        p.poll(&src);
        drain(&mut p);
        assert_eq!(p.session().start(), Some(AbsoluteTime::from_millis(1000.0)));
        assert_eq!(times(&p, S1), vec![0.2]);
        assert_eq!(times(&p, S2), vec![0.0]);
    }

    #[test]
    fn consecutive_collapse_within_poll() {
        let mut p = started();
        let mut src = ManualSource::new();
        let t = 100.0;
        for s in [
            Sample::new(t, 5.0),
            Sample::new(t, 5.0),
            Sample::new(t + 1.0, 5.0),
            Sample::new(t + 2.0, 7.0),
        ] {
            src.push(S1, s);
        }
        assert_eq!(queued(&p.poll(&src)), [2, 0]);
        drain(&mut p);
        assert_eq!(values(&p, S1), vec![5.0, 7.0]);
        assert_eq!(times(&p, S1), vec![0.0, 0.002]);
    }

    #[test]
    fn identical_poll_within_window_is_debounced() {
        let mut p = started();
        let batch = vec![Sample::new(10.0, 1.0), Sample::new(20.0, 2.0)];
        let first = p.ingest([batch.clone(), Vec::new()], AbsoluteTime::from_millis(100.0));
        assert_eq!(queued(&first), [2, 0]);
        let second = p.ingest([batch, Vec::new()], AbsoluteTime::from_millis(200.0));
        assert_eq!(second, PollOutcome::Debounced);
        assert_eq!(p.channel_state(S1).queue.len(), 2);
    }

    #[test]
    fn replayed_source_array_stops_at_watermark() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.set_samples(S1, vec![Sample::new(10.0, 1.0), Sample::new(20.0, 2.0)]);
        assert_eq!(queued(&p.poll(&src)), [2, 0]);
        src.advance(50.0);
        assert_eq!(p.poll(&src), PollOutcome::NoNewData);
        assert_eq!(p.channel_state(S1).queue.len(), 2);
    }

    #[test]
    fn start_at_ignores_history_from_before_the_run() {
        let mut p = Pipeline::new(PipelineSettings::default());
        let mut src = ManualSource::new();
        for i in 0..6 {
            src.push(S1, Sample::new(600.0 + f64::from(i) * 200.0, f64::from(i)));
        }
        src.push(S2, Sample::new(2000.0, 7.0));

        p.start_measurement_at(AbsoluteTime::from_millis(2000.0));
        assert_eq!(p.poll(&src), PollOutcome::NoNewData);
        assert_eq!(p.session(), SessionClock::Unset);

        src.push(S1, Sample::new(2150.0, 9.0));
        src.push(S2, Sample::new(2100.0, 8.0));
        assert_eq!(queued(&p.poll(&src)), [1, 1]);
        drain(&mut p);
        assert_eq!(p.session().start(), Some(AbsoluteTime::from_millis(2100.0)));
        assert_eq!(values(&p, S1), vec![9.0]);
        assert_eq!(values(&p, S2), vec![8.0]);
    }

    #[test]
    fn debounce_key_distinguishes_channels() {
        let mut p = started();
        let batch = vec![Sample::new(10.0, 1.0)];
        p.ingest([batch.clone(), Vec::new()], AbsoluteTime::from_millis(0.0));
        let later = vec![Sample::new(10.0, 1.0)];
        // Same content on the other channel hashes differently.
        let other = p.ingest([Vec::new(), later], AbsoluteTime::from_millis(1.0));
        assert_eq!(queued(&other), [0, 1]);
        assert_eq!(
            p.ingest([batch, Vec::new()], AbsoluteTime::from_millis(2.0)),
            PollOutcome::Debounced
        );
        assert_eq!(
            p.channel_state(S1).watermark.get(),
            Some(AbsoluteTime::from_millis(10.0))
        );
    }

    #[test]
    fn unhashable_poll_is_processed_without_debounce() {
        let mut p = started();
        let batch = vec![Sample::new(10.0, f64::NAN), Sample::new(20.0, 2.0)];
        match p.ingest([batch, Vec::new()], AbsoluteTime::from_millis(0.0)) {
            PollOutcome::Accepted { queued, unhashable } => {
                assert_eq!(queued, [2, 0]);
                assert!(matches!(unhashable, Some(DedupError::NonFinite { field: "value", .. })));
            }
            other => panic!("expected accepted poll, got {other:?}"),
        }
    }

    #[test]
    fn pruned_source_yields_only_new_samples() {
        let mut p = started();
        let mut src = ManualSource::new();
        for i in 0..10 {
            src.push(S1, Sample::new(i as f64 * 100.0, i as f64));
        }
        assert_eq!(queued(&p.poll(&src)), [10, 0]);

        src.prune_to(S1, 3);
        src.push(S1, Sample::new(1000.0, 10.0));
        src.push(S1, Sample::new(1100.0, 11.0));
        assert_eq!(queued(&p.poll(&src)), [2, 0]);

        drain(&mut p);
        assert_eq!(values(&p, S1), (0..12).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn pruned_source_behind_watermark_is_no_new_data() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(500.0, 1.0));
        p.poll(&src);
        src.set_samples(S1, vec![Sample::new(100.0, 4.0)]);
        assert_eq!(p.poll(&src), PollOutcome::NoNewData);
    }

    #[test]
    fn repeat_across_polls_is_dropped_by_queue() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(1000.0, 5.0));
        p.poll(&src);
        // Sub-millisecond later with the same value: a different timestamp,
        // so it passes the watermark, but the same chart point.
        src.push(S1, Sample::new(1000.4, 5.0));
        assert_eq!(queued(&p.poll(&src)), [0, 0]);
        assert_eq!(p.channel_state(S1).queue.len(), 1);
    }

    #[test]
    fn repeat_across_flushes_is_dropped_by_window() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(1000.0, 5.0));
        p.poll(&src);
        drain(&mut p);
        src.push(S1, Sample::new(1000.3, 5.0));
        assert_eq!(queued(&p.poll(&src)), [1, 0]);
        drain(&mut p);
        assert_eq!(p.display_window(S1).len(), 1);
    }

    #[test]
    fn flusher_disarms_and_rearms() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(0.0, 1.0));
        p.poll(&src);
        assert!(p.flush_armed());
        assert_eq!(p.flush(), FlushStep::Idle);
        assert!(!p.flush_armed());
        assert_eq!(p.flush(), FlushStep::Idle);

        src.push(S1, Sample::new(50.0, 2.0));
        p.poll(&src);
        assert!(p.flush_armed());
        assert_eq!(p.flush(), FlushStep::Idle);
        assert_eq!(values(&p, S1), vec![1.0, 2.0]);
    }

    #[test]
    fn burst_is_drained_in_bounded_batches() {
        let mut p = started();
        let mut src = ManualSource::new();
        for i in 0..1000 {
            src.push(S1, Sample::new(i as f64, i as f64));
        }
        p.poll(&src);
        assert_eq!(p.flush(), FlushStep::Continue);
        // First frame is capped at max_flush.
        assert_eq!(p.channel_state(S1).queue.len(), 1000 - 64);
        let frames = drain(&mut p);
        assert!(frames < 40, "took {frames} frames");
        assert_eq!(p.display_window(S1).len(), 200);
        assert_eq!(p.display_window(S1).last().map(|pt| pt.value), Some(999.0));
    }

    #[test]
    fn stop_discards_queued_points() {
        let mut p = started();
        let mut src = ManualSource::new();
        for i in 0..100 {
            src.push(S1, Sample::new(1000.0 + i as f64, i as f64));
        }
        p.poll(&src);
        p.flush();
        p.stop_measurement();

        assert_eq!(p.flush(), FlushStep::Idle);
        assert!(p.display_window(S1).is_empty());
        assert!(p.channel_state(S1).queue.is_empty());
        assert_eq!(p.channel_state(S1).watermark, Watermark::Unset);
        assert_eq!(p.session(), SessionClock::Unset);
        assert_eq!(p.poll(&src), PollOutcome::Inactive);
    }

    #[test]
    fn restart_re_zeroes_session() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(1000.0, 1.0));
        p.poll(&src);
        drain(&mut p);

        p.start_measurement();
        src.set_samples(S1, vec![Sample::new(5000.0, 2.0), Sample::new(5250.0, 3.0)]);
        p.poll(&src);
        drain(&mut p);
        assert_eq!(times(&p, S1), vec![0.0, 0.25]);
    }

    #[test]
    fn one_second_end_to_end() {
        let mut p = started();
        let mut src = ManualSource::new();
        let mut value = 0.0;
        for now in (0..=1000u32).step_by(50) {
            src.set_now(f64::from(now));
            if now < 1000 {
                value += 1.0;
                src.push(S1, Sample::new(f64::from(now), value));
            }
            if now > 0 && now % 100 == 0 {
                p.poll(&src);
                drain(&mut p);
            }
        }

        let window = p.display_window(S1);
        assert_eq!(window.len(), 20);
        assert!(window.len() <= window.capacity());
        assert_eq!(values(&p, S1), (1..=20).map(f64::from).collect::<Vec<_>>());
        let t = times(&p, S1);
        assert!(t.windows(2).all(|w| w[1] > w[0]), "times not increasing: {t:?}");
        assert!(p.display_window(S2).is_empty());
    }

    #[test]
    fn status_reports_diagnostics() {
        let mut p = started();
        let mut src = ManualSource::new();
        src.push(S1, Sample::new(300.0, 1.0));
        src.push(S1, Sample::new(400.0, 2.0));
        p.poll(&src);

        let status = p.status();
        assert!(status.measuring);
        assert!(status.flush_armed);
        assert_eq!(status.session_start_ms, Some(300.0));
        assert_eq!(status.channels[0].watermark_ms, Some(400.0));
        assert_eq!(status.channels[0].queued, 2);
        assert_eq!(status.channels[0].displayed, 0);
        assert_eq!(status.channels[1].watermark_ms, None);

        drain(&mut p);
        let status = p.status();
        assert_eq!(status.channels[0].displayed, 2);
        assert_eq!(status.channels[0].last_time, Some(0.1));
    }

    #[test]
    fn settings_are_clamped() {
        let config = PipelineConfig {
            window_capacity: 0,
            base_flush: 0,
            max_flush: 0,
            hash_history_limit: 0,
            clamp_epsilon_ms: -1.0,
            ..Default::default()
        };
        let s = PipelineSettings::from(&config);
        assert_eq!(s.window_capacity, 1);
        assert_eq!(s.base_flush, 1);
        assert_eq!(s.max_flush, 1);
        assert_eq!(s.hash_history_limit, 1);
        assert_eq!(s.epsilon, PipelineSettings::DEFAULT_EPSILON);
    }

    #[test]
    fn default_epsilon_is_half_millisecond() {
        assert_eq!(PipelineSettings::default().epsilon, 0.0005);
    }
}
