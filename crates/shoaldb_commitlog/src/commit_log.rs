//! Commit log contract.
//!
//! [`CommitLog`] is the seam between the table/transaction layer and the
//! durability layer. The replicated implementation totally orders and
//! replicates entries through the segment store; the in-memory one backs
//! tests and single-node embedding. Variants are selected at construction
//! through [`crate::manager::CommitLogManager`].

use crate::entry::LogEntry;
use crate::error::LogResult;
use crate::pending::PendingAppend;
use crate::position::SequencePosition;
use parking_lot::RwLock;
use std::sync::Arc;

/// Observer notified after each durable synchronous append.
///
/// Registering a listener on a log forces every later append into
/// synchronous mode: listeners are only ever told about entries that are
/// already durable.
pub trait CommitLogListener: Send + Sync {
    /// Called with the durable position and the entry, after the append's
    /// completion resolved and before `append` returns to its caller.
    fn entry_appended(&self, position: SequencePosition, entry: &LogEntry);
}

/// Consumer applying recovered or tailed entries to state.
pub trait EntryConsumer {
    /// Applies one entry. Called in ascending position order, at most
    /// once per position per replay pass.
    ///
    /// # Errors
    ///
    /// An error aborts the replay pass and is propagated to its caller.
    fn apply(&mut self, position: SequencePosition, entry: LogEntry) -> LogResult<()>;
}

impl<F> EntryConsumer for F
where
    F: FnMut(SequencePosition, LogEntry) -> LogResult<()>,
{
    fn apply(&mut self, position: SequencePosition, entry: LogEntry) -> LogResult<()> {
        self(position, entry)
    }
}

/// Outcome of an append call.
#[must_use]
pub enum AppendOutcome {
    /// The entry is durable at this position (synchronous mode).
    Durable(SequencePosition),
    /// The append is in flight; the caller must await the handle
    /// (asynchronous mode).
    Deferred(PendingAppend),
}

impl AppendOutcome {
    /// Returns the durable position, waiting on a deferred completion
    /// first if necessary.
    ///
    /// # Errors
    ///
    /// Returns the failure the completion carried.
    pub fn wait(self) -> LogResult<SequencePosition> {
        match self {
            Self::Durable(position) => Ok(position),
            Self::Deferred(pending) => pending.wait(),
        }
    }

    /// Returns the position if the entry is already durable.
    #[must_use]
    pub fn position(&self) -> Option<SequencePosition> {
        match self {
            Self::Durable(position) => Some(*position),
            Self::Deferred(_) => None,
        }
    }

    /// Returns true if the caller must await the completion separately.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

/// A totally ordered durable log of state changes for one tablespace.
///
/// # State machine
///
/// A log is created idle, enters writing mode through
/// [`CommitLog::start_writing`], and ends in one of two terminal states:
/// closed (via [`CommitLog::close`]) or failed (after an unrecoverable
/// fault). A failed log must be replaced by a fresh instance once a new
/// leader is elected; no operation revives it.
pub trait CommitLog: Send + Sync {
    /// Appends an entry to the log.
    ///
    /// With `synchronous` set, blocks until the entry is durable and
    /// returns [`AppendOutcome::Durable`]. Otherwise returns
    /// [`AppendOutcome::Deferred`] immediately. If any listener is
    /// registered the call is upgraded to synchronous regardless of the
    /// flag, so listeners only observe durable entries.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::LogError::Closed`] once the log is closed or
    /// failed; otherwise surfaces the store failure that settled the
    /// append.
    fn append(&self, entry: LogEntry, synchronous: bool) -> LogResult<AppendOutcome>;

    /// Loads the segment listing and opens a brand-new segment for
    /// writing. Called by the leader after recovery.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the placement policy cannot
    /// assemble a replica set, or the metadata store rejects the updated
    /// listing.
    fn start_writing(&self) -> LogResult<()>;

    /// Replays all entries strictly after `checkpoint` into `consumer`,
    /// in ascending order. With `fence` set, takes exclusive ownership of
    /// every segment it opens, invalidating the previous writer.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::LogError::FullResyncNeeded`] when the
    /// checkpoint is no longer covered by the retained segments; any
    /// store error during replay is fatal and marks the log failed.
    fn recover(
        &self,
        checkpoint: SequencePosition,
        consumer: &mut dyn EntryConsumer,
        fence: bool,
    ) -> LogResult<()>;

    /// Performs one bounded, non-fencing pass over the leader's segments,
    /// delivering entries after `skip_past` to `consumer`. Callers poll
    /// this repeatedly with an advancing `skip_past` to tail the leader.
    ///
    /// # Errors
    ///
    /// Propagates consumer and store errors; a segment whose recovery is
    /// in progress ends the pass early without error.
    fn follow_the_leader(
        &self,
        skip_past: SequencePosition,
        consumer: &mut dyn EntryConsumer,
    ) -> LogResult<()>;

    /// Deletes segments that fell out of the retention window. The
    /// currently open and the most recently written segments are never
    /// deleted. No-op when retention is disabled.
    ///
    /// # Errors
    ///
    /// Fails on the first segment whose deletion the store rejects;
    /// already-deleted segments are tolerated.
    fn drop_old_segments(&self, checkpoint: SequencePosition) -> LogResult<()>;

    /// Deletes every active segment and replaces the listing with a
    /// fresh empty one, so the next [`CommitLog::start_writing`] begins a
    /// new log. Used before restoring a snapshot from a remote peer.
    ///
    /// # Errors
    ///
    /// Fails if the store or metadata store rejects the truncation.
    fn clear(&self) -> LogResult<()>;

    /// Closes the log. Idempotent; in-flight appends settle on their own,
    /// new ones fail immediately.
    fn close(&self);

    /// Returns true once the log is closed (including after a failure).
    fn is_closed(&self) -> bool;

    /// Returns true once the log hit an unrecoverable fault.
    fn is_failed(&self) -> bool;

    /// Returns the last position known durable, or
    /// [`SequencePosition::START_OF_TIME`] if nothing was ever appended.
    fn last_sequence_number(&self) -> SequencePosition;

    /// Registers a listener. See [`CommitLogListener`] for the effect on
    /// append modes.
    fn add_listener(&self, listener: Arc<dyn CommitLogListener>);
}

/// Registered listeners of one log.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn CommitLogListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn CommitLogListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Notifies all listeners in registration order.
    pub(crate) fn notify(&self, position: SequencePosition, entry: &LogEntry) {
        for listener in self.listeners.read().iter() {
            listener.entry_appended(position, entry);
        }
    }
}
