use std::collections::HashMap;
use std::hash::{DefaultHasher, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::{AbsoluteTime, Sample};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DedupError {
    #[error("poll content is not hashable: non-finite {field} in batch {batch} at position {position}")]
    NonFinite {
        field: &'static str,
        batch: usize,
        position: usize,
    },
}

/// Content hash of one poll's worth of new samples across all channels.
///
/// Covers timestamp and value of every sample, in order, with a per-batch
/// length prefix so `[a, b] + []` and `[a] + [b]` hash differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollKey(u64);

impl PollKey {
    pub fn from_batches(batches: &[&[Sample]]) -> Result<Self, DedupError> {
        let mut hasher = DefaultHasher::new();
        for (batch_idx, batch) in batches.iter().enumerate() {
            hasher.write_usize(batch.len());
            for (position, sample) in batch.iter().enumerate() {
                if !sample.timestamp.is_finite() {
                    return Err(DedupError::NonFinite {
                        field: "timestamp",
                        batch: batch_idx,
                        position,
                    });
                }
                if !sample.value.is_finite() {
                    return Err(DedupError::NonFinite {
                        field: "value",
                        batch: batch_idx,
                        position,
                    });
                }
                hasher.write_u64(sample.timestamp.millis().to_bits());
                hasher.write_u64(sample.value.to_bits());
            }
        }
        Ok(PollKey(hasher.finish()))
    }
}

/// Outcome of a poll debounce check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fresh,
    /// Identical content was seen within the debounce window.
    Echo,
}

/// Poll-level debounce: rejects a whole poll whose content hash was seen
/// within the last `window_ms`.
///
/// History entries older than four windows are evicted on every check, and
/// the history never holds more than `max_entries` keys.
#[derive(Debug)]
pub struct PollDebouncer {
    window_ms: f64,
    max_entries: usize,
    history: HashMap<PollKey, AbsoluteTime>,
}

impl PollDebouncer {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        PollDebouncer {
            window_ms: window_ms as f64,
            max_entries,
            history: HashMap::with_capacity(max_entries + 1),
        }
    }

    /// Check `key` against recent polls and record it if fresh.
    ///
    /// An echo does not refresh the original sighting, so repeated echoes
    /// cannot extend the window indefinitely.
    pub fn check(&mut self, key: PollKey, now: AbsoluteTime) -> Verdict {
        let horizon = self.window_ms * 4.0;
        self.history
            .retain(|_, seen| now.millis_since(*seen) <= horizon);

        if let Some(seen) = self.history.get(&key) {
            if now.millis_since(*seen) < self.window_ms {
                return Verdict::Echo;
            }
        }

        self.history.insert(key, now);
        while self.history.len() > self.max_entries {
            let oldest = self
                .history
                .iter()
                .min_by(|a, b| a.1.millis().total_cmp(&b.1.millis()))
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => {
                    self.history.remove(&k);
                }
                None => break,
            }
        }
        Verdict::Fresh
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// How consecutive collapsing decides that a sample repeats its predecessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseMode {
    /// Drop only samples whose `(timestamp, value)` equals the previous one.
    ExactPair,
    /// Also drop samples whose value equals the last kept sample's value.
    #[default]
    UnchangedValue,
}

/// One pass over a single channel's new samples, dropping repeats of the
/// immediately preceding reading.
#[must_use]
pub fn collapse_consecutive(samples: &[Sample], mode: CollapseMode) -> Vec<Sample> {
    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    let mut prev: Option<Sample> = None;
    for &sample in samples {
        let repeat = match (prev, mode) {
            (None, _) => false,
            (Some(p), CollapseMode::ExactPair) => {
                p.timestamp == sample.timestamp && p.value == sample.value
            }
            (Some(p), CollapseMode::UnchangedValue) => p.value == sample.value,
        };
        if repeat {
            continue;
        }
        out.push(sample);
        prev = Some(sample);
    }
    out
}
