//! Commit log configuration.

use crate::error::{LogError, LogResult};
use std::time::Duration;

/// Configuration for a replicated commit log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Number of nodes holding a copy of each segment.
    pub replica_set_size: usize,

    /// Number of replicas each entry is written to.
    pub write_quorum: usize,

    /// Number of acknowledgements required before an append counts as
    /// durable.
    pub ack_quorum: usize,

    /// How long segments are retained after creation (zero = never prune).
    pub retention_period: Duration,

    /// Secret segments are created with and must be opened with.
    pub auth_secret: Vec<u8>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            replica_set_size: 1,
            write_quorum: 1,
            ack_quorum: 1,
            retention_period: Duration::from_secs(60 * 60 * 24), // 24 h
            auth_secret: b"shoaldb".to_vec(),
        }
    }
}

impl LogConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the replica set size.
    #[must_use]
    pub const fn replica_set_size(mut self, size: usize) -> Self {
        self.replica_set_size = size;
        self
    }

    /// Sets the write quorum.
    #[must_use]
    pub const fn write_quorum(mut self, quorum: usize) -> Self {
        self.write_quorum = quorum;
        self
    }

    /// Sets the ack quorum.
    #[must_use]
    pub const fn ack_quorum(mut self, quorum: usize) -> Self {
        self.ack_quorum = quorum;
        self
    }

    /// Sets the retention period. [`Duration::ZERO`] disables pruning.
    #[must_use]
    pub const fn retention_period(mut self, period: Duration) -> Self {
        self.retention_period = period;
        self
    }

    /// Sets the auth secret.
    #[must_use]
    pub fn auth_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.auth_secret = secret.into();
        self
    }

    /// Checks the quorum relationship: `1 <= ack <= write <= replicas`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] when the relationship does not
    /// hold.
    pub fn validate(&self) -> LogResult<()> {
        if self.replica_set_size == 0 {
            return Err(LogError::invalid_config("replica set size must be >= 1"));
        }
        if self.write_quorum == 0 || self.write_quorum > self.replica_set_size {
            return Err(LogError::invalid_config(format!(
                "write quorum {} must be between 1 and replica set size {}",
                self.write_quorum, self.replica_set_size
            )));
        }
        if self.ack_quorum == 0 || self.ack_quorum > self.write_quorum {
            return Err(LogError::invalid_config(format!(
                "ack quorum {} must be between 1 and write quorum {}",
                self.ack_quorum, self.write_quorum
            )));
        }
        Ok(())
    }
}
