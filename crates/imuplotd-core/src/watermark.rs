use crate::sample::{AbsoluteTime, Sample};

/// Highest device timestamp already accepted for a channel.
///
/// Filtering by timestamp instead of array position keeps the tracker correct
/// when the device link prunes or replaces its buffer between polls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Watermark {
    /// Nothing consumed yet in this session.
    #[default]
    Unset,
    At(AbsoluteTime),
}

impl Watermark {
    /// Returns the samples strictly newer than the watermark, in source order.
    ///
    /// A buffer whose newest sample is at or behind the watermark yields
    /// nothing. Samples with a non-finite timestamp never pass.
    #[must_use]
    pub fn filter_new(&self, samples: &[Sample]) -> Vec<Sample> {
        samples
            .iter()
            .filter(|s| s.timestamp.is_finite() && self.is_behind(s.timestamp))
            .copied()
            .collect()
    }

    /// True if `t` has not been consumed yet.
    #[must_use]
    pub fn is_behind(&self, t: AbsoluteTime) -> bool {
        match self {
            Watermark::Unset => true,
            Watermark::At(mark) => t > *mark,
        }
    }

    /// Move the watermark forward to `t`. Never moves it backwards.
    pub fn advance(&mut self, t: AbsoluteTime) {
        if !t.is_finite() {
            return;
        }
        *self = match *self {
            Watermark::Unset => Watermark::At(t),
            Watermark::At(mark) => Watermark::At(mark.max(t)),
        };
    }

    #[must_use]
    pub fn get(&self) -> Option<AbsoluteTime> {
        match self {
            Watermark::Unset => None,
            Watermark::At(t) => Some(*t),
        }
    }

    pub fn reset(&mut self) {
        *self = Watermark::Unset;
    }
}
