use std::collections::VecDeque;

use crate::sample::ChartPoint;

/// Pending points for one channel, fed by polls and drained by the flusher.
///
/// Unbounded: it absorbs bursts, and the flusher's adaptive batch size grows
/// with the backlog so it always catches up.
#[derive(Debug, Default)]
pub struct OutputQueue {
    points: VecDeque<ChartPoint>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point unless it repeats the current tail.
    ///
    /// Catches repeats that straddle two polls, which per-poll collapsing
    /// cannot see. Returns true if the point was queued.
    pub fn push(&mut self, point: ChartPoint) -> bool {
        if let Some(tail) = self.points.back() {
            if tail.same_sample(&point) {
                return false;
            }
        }
        self.points.push_back(point);
        true
    }

    /// Remove and return up to `n` points from the front.
    pub fn drain_front(&mut self, n: usize) -> Vec<ChartPoint> {
        let n = n.min(self.points.len());
        self.points.drain(..n).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Number of points to move in one flush for a queue holding `queued`.
///
/// A quarter of the backlog, never less than `base` (forward progress on
/// small backlogs) and never more than `max` (bounded per-frame cost).
#[must_use]
pub fn flush_batch_size(queued: usize, base: usize, max: usize) -> usize {
    if queued == 0 {
        return 0;
    }
    queued.div_ceil(4).max(base).min(max)
}
