use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::sample::ChartPoint;

/// Bounded, render-visible tail of a channel's points.
///
/// Invariants: `time` strictly increases from front to back, and the window
/// never holds more than `capacity` points (oldest evicted first).
#[derive(Debug)]
pub struct DisplayWindow {
    points: VecDeque<ChartPoint>,
    /// Newest appended point as it arrived, before any nudge.
    raw_tail: Option<ChartPoint>,
    capacity: usize,
    epsilon: f64,
}

impl DisplayWindow {
    /// `epsilon` is the nudge, in seconds, applied to points whose time does
    /// not exceed their predecessor's.
    pub fn new(capacity: usize, epsilon: f64) -> Self {
        let capacity = capacity.max(1);
        DisplayWindow {
            points: VecDeque::with_capacity(capacity),
            raw_tail: None,
            capacity,
            epsilon,
        }
    }

    /// Append a flushed chunk, returning how many points were added.
    ///
    /// A leading point that repeats the current tail is dropped; the tail is
    /// compared as it arrived, so a nudged tail still matches its repeat.
    /// Ties and backwards steps are nudged forward by epsilon, never discarded.
    pub fn append(&mut self, chunk: Vec<ChartPoint>) -> usize {
        let mut incoming = chunk.into_iter().peekable();
        let repeats_tail = match (self.raw_tail.as_ref(), incoming.peek()) {
            (Some(tail), Some(first)) => tail.same_sample(first),
            _ => false,
        };
        if repeats_tail {
            incoming.next();
        }

        let mut last_time = self.points.back().map(|p| p.time);
        let mut appended = 0;
        for mut point in incoming {
            self.raw_tail = Some(point);
            if let Some(last) = last_time {
                if point.time.partial_cmp(&last) != Some(Ordering::Greater) {
                    point.time = last + self.epsilon;
                }
            }
            last_time = Some(point.time);
            self.points.push_back(point);
            appended += 1;
        }

        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        appended
    }

    pub fn points(&self) -> impl ExactSizeIterator<Item = &ChartPoint> {
        self.points.iter()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ChartPoint> {
        self.points.iter().copied().collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ChartPoint> {
        self.points.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.raw_tail = None;
    }
}
