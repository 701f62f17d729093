//! Log positions.

use std::fmt;

/// Position of one entry in the log: the segment it lives in and its
/// offset within that segment.
///
/// Positions order all entries ever appended: first by segment id, then by
/// offset. [`SequencePosition::START_OF_TIME`] compares less than every
/// real position and marks "nothing applied yet" checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequencePosition {
    /// Segment holding the entry.
    pub segment_id: i64,
    /// Offset of the entry within the segment.
    pub offset: i64,
}

impl SequencePosition {
    /// Sentinel ordered before every real position.
    pub const START_OF_TIME: Self = Self {
        segment_id: -1,
        offset: -1,
    };

    /// Creates a position.
    #[must_use]
    pub const fn new(segment_id: i64, offset: i64) -> Self {
        Self { segment_id, offset }
    }

    /// Returns true if `self` is strictly after `other`.
    #[must_use]
    pub fn after(&self, other: &Self) -> bool {
        self > other
    }

    /// Returns true for the start-of-time sentinel.
    #[must_use]
    pub const fn is_start_of_time(&self) -> bool {
        self.segment_id == Self::START_OF_TIME.segment_id
            && self.offset == Self::START_OF_TIME.offset
    }
}

impl fmt::Display for SequencePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.offset)
    }
}
