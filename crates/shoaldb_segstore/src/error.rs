//! Error types for the segment store layer.

use thiserror::Error;

/// Result type for segment store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in segment store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer took exclusive ownership of the segment.
    #[error("segment {segment_id} fenced by another writer")]
    SegmentFenced {
        /// The fenced segment.
        segment_id: i64,
    },

    /// The segment handle was closed before the operation ran.
    #[error("segment {segment_id} is closed")]
    SegmentClosed {
        /// The closed segment.
        segment_id: i64,
    },

    /// The segment does not exist in the store.
    #[error("segment {segment_id} not found")]
    SegmentNotFound {
        /// The missing segment.
        segment_id: i64,
    },

    /// Not enough distinct nodes to satisfy a replica set or quorum.
    #[error("insufficient nodes: requested {requested}, available {available}")]
    InsufficientNodes {
        /// Replica slots that had to be filled.
        requested: usize,
        /// Nodes actually available.
        available: usize,
    },

    /// The segment is being recovered by a new owner and cannot be
    /// opened for tailing yet.
    #[error("segment {segment_id} recovery in progress")]
    RecoveryInProgress {
        /// The segment under recovery.
        segment_id: i64,
    },

    /// The caller presented the wrong auth secret for the segment.
    #[error("auth failed for segment {segment_id}")]
    AuthFailed {
        /// The segment the caller tried to open.
        segment_id: i64,
    },

    /// A node address string could not be parsed.
    #[error("invalid node address: {input}")]
    InvalidAddress {
        /// The unparseable input.
        input: String,
    },

    /// The store failed for a reason outside the taxonomy above.
    #[error("segment store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid address error.
    pub fn invalid_address(input: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
        }
    }
}
