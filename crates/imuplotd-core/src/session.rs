use crate::sample::AbsoluteTime;

/// Time zero of one measurement run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum SessionClock {
    #[default]
    Unset,
    StartedAt(AbsoluteTime),
}

impl SessionClock {
    /// Set the session start if none exists yet. Later calls are no-ops.
    pub fn anchor(&mut self, first_timestamp: AbsoluteTime) {
        if matches!(self, SessionClock::Unset) && first_timestamp.is_finite() {
            *self = SessionClock::StartedAt(first_timestamp);
        }
    }

    /// Seconds since session start, or `None` before the first anchor.
    #[must_use]
    pub fn relative_seconds(&self, t: AbsoluteTime) -> Option<f64> {
        match self {
            SessionClock::Unset => None,
            SessionClock::StartedAt(start) => Some(t.millis_since(*start) / 1000.0),
        }
    }

    #[must_use]
    pub fn start(&self) -> Option<AbsoluteTime> {
        match self {
            SessionClock::Unset => None,
            SessionClock::StartedAt(start) => Some(*start),
        }
    }

    pub fn reset(&mut self) {
        *self = SessionClock::Unset;
    }
}
