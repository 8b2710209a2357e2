//! Property-based tests for the ingestion pipeline.
//!
//! Covers: display window ordering and bound, tolerance of source pruning,
//! and bounded catch-up of the adaptive flusher.

use imuplotd_core::pipeline::{FlushStep, Pipeline, PipelineSettings, PollOutcome};
use imuplotd_core::sample::{ChannelId, ChartPoint, Sample};
use imuplotd_core::source::ManualSource;
use imuplotd_core::window::DisplayWindow;
use proptest::prelude::*;

fn drain(pipeline: &mut Pipeline) -> usize {
    let mut frames = 1;
    while pipeline.flush() == FlushStep::Continue {
        frames += 1;
    }
    frames
}

fn strictly_increasing(window: &DisplayWindow) -> bool {
    let times: Vec<f64> = window.points().map(|p| p.time).collect();
    times.windows(2).all(|w| w[1] > w[0])
}

// ── Display window ───────────────────────────────────────────────────

proptest! {
    /// Any chunk sequence, including ties and backwards steps, leaves the
    /// window strictly increasing and within capacity.
    #[test]
    fn window_is_monotonic_and_bounded(
        capacity in 1usize..64,
        chunks in prop::collection::vec(
            prop::collection::vec((0.0f64..10.0, 0.0f64..3.0), 0..32),
            1..16,
        ),
    ) {
        let mut window = DisplayWindow::new(capacity, 0.0005);
        for chunk in chunks {
            window.append(chunk.into_iter().map(|(t, v)| ChartPoint::new(t, v)).collect());
            prop_assert!(window.len() <= capacity);
            prop_assert!(strictly_increasing(&window));
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

proptest! {
    /// Arbitrary out-of-order device arrays never break window ordering.
    #[test]
    fn pipeline_windows_stay_monotonic(
        polls in prop::collection::vec(
            (
                prop::collection::vec((0.0f64..5000.0, 0u8..4), 0..24),
                prop::collection::vec((0.0f64..5000.0, 0u8..4), 0..24),
            ),
            1..12,
        ),
    ) {
        let mut pipeline = Pipeline::new(PipelineSettings {
            window_capacity: 50,
            ..PipelineSettings::default()
        });
        pipeline.start_measurement();
        let mut source = ManualSource::new();

        for (i, (a, b)) in polls.into_iter().enumerate() {
            let to_samples = |raw: Vec<(f64, u8)>| {
                raw.into_iter()
                    .map(|(t, v)| Sample::new(t, f64::from(v)))
                    .collect::<Vec<_>>()
            };
            source.set_samples(ChannelId::Sensor1, to_samples(a));
            source.set_samples(ChannelId::Sensor2, to_samples(b));
            source.set_now(i as f64 * 100.0);
            pipeline.poll(&source);
            drain(&mut pipeline);

            for channel in ChannelId::ALL {
                let window = pipeline.display_window(channel);
                prop_assert!(window.len() <= 50);
                prop_assert!(strictly_increasing(window));
            }
        }
    }

    /// Every sample appended by the device is queued exactly once, however
    /// much of the older history the device prunes between polls.
    #[test]
    fn pruning_never_loses_or_repeats_samples(
        rounds in prop::collection::vec((1usize..20, 0usize..10), 1..20),
    ) {
        let mut pipeline = Pipeline::new(PipelineSettings::default());
        pipeline.start_measurement();
        let mut source = ManualSource::new();

        let mut next = 0u32;
        let mut pushed = 0usize;
        let mut queued = 0usize;
        for (round, (fresh, kept_history)) in rounds.into_iter().enumerate() {
            for _ in 0..fresh {
                next += 1;
                source.push(
                    ChannelId::Sensor1,
                    Sample::new(f64::from(next) * 10.0, f64::from(next)),
                );
            }
            pushed += fresh;
            source.prune_to(ChannelId::Sensor1, fresh + kept_history);
            source.set_now(round as f64 * 100.0);

            if let PollOutcome::Accepted { queued: q, .. } = pipeline.poll(&source) {
                queued += q[0];
            }
        }
        prop_assert_eq!(queued, pushed);
        prop_assert_eq!(
            pipeline.channel_state(ChannelId::Sensor1).queue.len(),
            pushed
        );
    }

    /// A finite burst drains in a bounded number of frames.
    #[test]
    fn burst_drains_in_bounded_frames(n in 1usize..5000) {
        let mut pipeline = Pipeline::new(PipelineSettings::default());
        pipeline.start_measurement();
        let mut source = ManualSource::new();
        for i in 0..n {
            source.push(ChannelId::Sensor2, Sample::new(i as f64, i as f64));
        }
        pipeline.poll(&source);

        let frames = drain(&mut pipeline);
        prop_assert!(frames <= n / 64 + 20, "{} points took {} frames", n, frames);
        prop_assert!(pipeline.channel_state(ChannelId::Sensor2).queue.is_empty());
        prop_assert_eq!(pipeline.display_window(ChannelId::Sensor2).len(), n.min(200));
    }
}
