//! Commit log factories.
//!
//! The database layer owns one manager and asks it for a log per
//! tablespace; which implementation backs the logs is decided once, at
//! manager construction.

use crate::commit_log::CommitLog;
use crate::config::LogConfig;
use crate::memory_log::MemoryCommitLog;
use crate::metadata::MetadataStore;
use crate::replicated::ReplicatedCommitLog;
use crate::types::TablespaceId;
use shoaldb_segstore::SegmentStore;
use std::sync::Arc;

/// Factory for per-tablespace commit logs.
pub trait CommitLogManager: Send + Sync {
    /// Creates the log for one tablespace. The returned log is idle until
    /// started through [`CommitLog::start_writing`] or a replay call.
    fn create_commit_log(&self, tablespace: TablespaceId) -> Box<dyn CommitLog>;
}

/// Builds replicated logs sharing one segment store, one metadata store
/// and one configuration.
pub struct ReplicatedLogManager {
    store: Arc<dyn SegmentStore>,
    metadata: Arc<dyn MetadataStore>,
    config: LogConfig,
}

impl ReplicatedLogManager {
    /// Creates a manager around shared store handles.
    #[must_use]
    pub fn new(
        store: Arc<dyn SegmentStore>,
        metadata: Arc<dyn MetadataStore>,
        config: LogConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            config,
        }
    }

    /// Configuration applied to every log this manager creates.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }
}

impl CommitLogManager for ReplicatedLogManager {
    fn create_commit_log(&self, tablespace: TablespaceId) -> Box<dyn CommitLog> {
        Box::new(ReplicatedCommitLog::new(
            tablespace,
            Arc::clone(&self.store),
            Arc::clone(&self.metadata),
            self.config.clone(),
        ))
    }
}

/// Builds non-durable [`MemoryCommitLog`] instances.
#[derive(Default)]
pub struct MemoryLogManager;

impl MemoryLogManager {
    /// Creates the manager.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CommitLogManager for MemoryLogManager {
    fn create_commit_log(&self, _tablespace: TablespaceId) -> Box<dyn CommitLog> {
        Box::new(MemoryCommitLog::new())
    }
}
