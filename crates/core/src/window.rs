use std::ops::Bound;

use chrono::{DateTime, Utc};

/// A time range with explicit bounds on each side.
///
/// Consecutive dispatcher ticks use half-open windows so that an entry on
/// the boundary belongs to exactly one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
}

impl TimeWindow {
    /// `[from, to]`
    pub fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(from),
            end: Bound::Included(to),
        }
    }

    /// `[from, to)`
    pub fn half_open(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(from),
            end: Bound::Excluded(to),
        }
    }

    /// `(from, to]`
    pub fn open_closed(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Excluded(from),
            end: Bound::Included(to),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let after_start = match self.start {
            Bound::Included(s) => t >= s,
            Bound::Excluded(s) => t > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => t <= e,
            Bound::Excluded(e) => t < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }
}
