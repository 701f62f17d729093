//! # shoaldb commit log
//!
//! Replicated segmented commit log: the durability layer that totally
//! orders state-change records, persists them across storage nodes, and
//! replays them during crash recovery and replica catch-up.
//!
//! A log is a sequence of segments hosted by a
//! [`shoaldb_segstore::SegmentStore`]. Which segments currently
//! constitute the log is persisted as a [`SegmentListing`] through a
//! [`MetadataStore`]. Every entry has a [`SequencePosition`], the
//! `(segment, offset)` pair that orders the whole log.
//!
//! ## Roles
//!
//! - The **leader** calls [`CommitLog::start_writing`], appends entries
//!   with [`CommitLog::append`] and prunes expired segments with
//!   [`CommitLog::drop_old_segments`].
//! - A **restarting node** replays everything after its last checkpoint
//!   with [`CommitLog::recover`], fencing the previous writer when it is
//!   taking over leadership.
//! - A **replica** polls [`CommitLog::follow_the_leader`] to tail the
//!   leader's segments without fencing them.
//!
//! ## Implementations
//!
//! [`ReplicatedCommitLog`] is the real engine;
//! [`MemoryCommitLog`] is the non-durable in-process variant for tests
//! and single-node embedding. Both are built through a
//! [`CommitLogManager`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit_log;
mod config;
mod entry;
mod error;
mod listing;
mod manager;
mod memory_log;
mod metadata;
mod pending;
mod position;
mod replicated;
mod types;

pub use commit_log::{AppendOutcome, CommitLog, CommitLogListener, EntryConsumer};
pub use config::LogConfig;
pub use entry::{LogEntry, ENTRY_VERSION};
pub use error::{LogError, LogResult, MetadataError, MetadataResult};
pub use listing::{SegmentListing, SegmentMeta};
pub use manager::{CommitLogManager, MemoryLogManager, ReplicatedLogManager};
pub use memory_log::MemoryCommitLog;
pub use metadata::{FileMetadataStore, MemoryMetadataStore, MetadataStore};
pub use pending::PendingAppend;
pub use position::SequencePosition;
pub use replicated::ReplicatedCommitLog;
pub use types::TablespaceId;
