//! Error types for the commit log.

use shoaldb_segstore::StoreError;
use std::io;
use thiserror::Error;

/// Result type for commit log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in commit log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log was closed before or during the operation.
    #[error("commit log is closed")]
    Closed,

    /// Segment store failure.
    #[error("segment store error: {0}")]
    Store(#[from] StoreError),

    /// Metadata store failure.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// The checkpoint references log data no longer retained; the caller
    /// must rebuild state from a remote snapshot.
    #[error("full resync required: {message}")]
    FullResyncNeeded {
        /// Why replay from the checkpoint is impossible.
        message: String,
    },

    /// A batch read returned fewer entries than the confirmed range
    /// promised, signaling store-side data loss.
    #[error("short read in segment {segment_id}: expected {expected} entries, got {actual}")]
    ShortRead {
        /// Segment the batch was read from.
        segment_id: i64,
        /// Entries the confirmed range promised.
        expected: usize,
        /// Entries actually returned.
        actual: usize,
    },

    /// A stored entry could not be decoded.
    #[error("corrupted log entry: {message}")]
    EntryCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The configuration is internally inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is inconsistent.
        message: String,
    },

    /// The log failed for a reason outside the taxonomy above.
    #[error("commit log unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A bounded synchronous wait expired before the completion settled.
    #[error("timed out waiting for append completion")]
    Timeout,
}

impl LogError {
    /// Creates a full-resync-needed error.
    pub fn full_resync_needed(message: impl Into<String>) -> Self {
        Self::FullResyncNeeded {
            message: message.into(),
        }
    }

    /// Creates an entry-corrupted error.
    pub fn entry_corrupted(message: impl Into<String>) -> Self {
        Self::EntryCorrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true for faults that close the log and mark it failed: the
    /// open segment was fenced by a new leader, or the replica set can no
    /// longer satisfy its quorum. Everything else is call-local.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::SegmentFenced { .. })
                | Self::Store(StoreError::InsufficientNodes { .. })
        )
    }
}

/// Result type for metadata store operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Errors from the metadata store collaborator.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// I/O error from the underlying system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored bytes could not be decoded.
    #[error("corrupted metadata: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The metadata directory is held by another process.
    #[error("metadata directory locked: another process has exclusive access")]
    Locked,
}

impl MetadataError {
    /// Creates a corrupted-metadata error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
