use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one of the two sensor channels on the device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Sensor1,
    Sensor2,
}

impl ChannelId {
    /// Number of channels the pipeline tracks.
    pub const COUNT: usize = 2;

    /// All channels in poll order.
    pub const ALL: [ChannelId; Self::COUNT] = [ChannelId::Sensor1, ChannelId::Sensor2];

    /// Zero-based slot used for per-channel arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ChannelId::Sensor1 => 0,
            ChannelId::Sensor2 => 1,
        }
    }

    /// User-facing key, as used on the command line and in status output.
    #[must_use]
    pub fn config_key(self) -> &'static str {
        match self {
            ChannelId::Sensor1 => "sensor1",
            ChannelId::Sensor2 => "sensor2",
        }
    }

    /// Parse a key produced by [`ChannelId::config_key`].
    #[must_use]
    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.config_key() == key)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Monotonic clock reading in milliseconds, as stamped by the device link.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbsoluteTime(f64);

impl AbsoluteTime {
    #[must_use]
    pub const fn from_millis(ms: f64) -> Self {
        AbsoluteTime(ms)
    }

    #[must_use]
    pub fn millis(self) -> f64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`. Negative if `earlier` is later.
    #[must_use]
    pub fn millis_since(self, earlier: AbsoluteTime) -> f64 {
        self.0 - earlier.0
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// Larger of two readings.
    #[must_use]
    pub fn max(self, other: AbsoluteTime) -> AbsoluteTime {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

/// A single reading produced by the device link. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: AbsoluteTime,
    pub value: f64,
}

impl Sample {
    #[must_use]
    pub const fn new(timestamp_ms: f64, value: f64) -> Self {
        Sample {
            timestamp: AbsoluteTime::from_millis(timestamp_ms),
            value,
        }
    }
}

/// A chart-ready point: session-relative seconds and the sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub time: f64,
    pub value: f64,
}

impl ChartPoint {
    #[must_use]
    pub const fn new(time: f64, value: f64) -> Self {
        ChartPoint { time, value }
    }

    /// Time rounded to whole milliseconds, the granularity used for
    /// duplicate detection.
    #[must_use]
    pub fn time_key(&self) -> i64 {
        (self.time * 1000.0).round() as i64
    }

    /// True if both points describe the same reading: equal millisecond
    /// time and equal value.
    #[must_use]
    pub fn same_sample(&self, other: &ChartPoint) -> bool {
        self.time_key() == other.time_key() && self.value == other.value
    }
}
