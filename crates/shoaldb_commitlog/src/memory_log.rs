//! Non-durable in-process commit log.

use crate::commit_log::{AppendOutcome, CommitLog, CommitLogListener, EntryConsumer, ListenerSet};
use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::pending::pending_pair;
use crate::position::SequencePosition;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Every entry of a memory log lives in this one synthetic segment.
const MEMORY_SEGMENT_ID: i64 = 1;

/// [`CommitLog`] backed by a plain in-process vector.
///
/// Nothing survives a restart; appends are durable the moment they land
/// in the vector. Used by tests and single-node embedding where the
/// replicated engine would be dead weight.
#[derive(Default)]
pub struct MemoryCommitLog {
    entries: Mutex<Vec<LogEntry>>,
    listeners: ListenerSet,
    closed: AtomicBool,
}

impl MemoryCommitLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: &LogEntry) -> SequencePosition {
        let mut entries = self.entries.lock();
        entries.push(entry.clone());
        SequencePosition::new(MEMORY_SEGMENT_ID, entries.len() as i64 - 1)
    }

    fn replay(
        &self,
        after: SequencePosition,
        consumer: &mut dyn EntryConsumer,
    ) -> LogResult<()> {
        let snapshot = self.entries.lock().clone();
        for (offset, entry) in snapshot.into_iter().enumerate() {
            let position = SequencePosition::new(MEMORY_SEGMENT_ID, offset as i64);
            if position.after(&after) {
                consumer.apply(position, entry)?;
            }
        }
        Ok(())
    }
}

impl CommitLog for MemoryCommitLog {
    fn append(&self, entry: LogEntry, synchronous: bool) -> LogResult<AppendOutcome> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }
        let position = self.push(&entry);
        if synchronous || !self.listeners.is_empty() {
            self.listeners.notify(position, &entry);
            return Ok(AppendOutcome::Durable(position));
        }
        // Already durable; hand back a settled completion so callers can
        // treat both implementations uniformly.
        let (pending, completion) = pending_pair();
        completion.complete(Ok(position));
        Ok(AppendOutcome::Deferred(pending))
    }

    fn start_writing(&self) -> LogResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    fn recover(
        &self,
        checkpoint: SequencePosition,
        consumer: &mut dyn EntryConsumer,
        _fence: bool,
    ) -> LogResult<()> {
        self.replay(checkpoint, consumer)
    }

    fn follow_the_leader(
        &self,
        skip_past: SequencePosition,
        consumer: &mut dyn EntryConsumer,
    ) -> LogResult<()> {
        self.replay(skip_past, consumer)
    }

    fn drop_old_segments(&self, _checkpoint: SequencePosition) -> LogResult<()> {
        Ok(())
    }

    fn clear(&self) -> LogResult<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_failed(&self) -> bool {
        false
    }

    fn last_sequence_number(&self) -> SequencePosition {
        let entries = self.entries.lock();
        if entries.is_empty() {
            SequencePosition::START_OF_TIME
        } else {
            SequencePosition::new(MEMORY_SEGMENT_ID, entries.len() as i64 - 1)
        }
    }

    fn add_listener(&self, listener: Arc<dyn CommitLogListener>) {
        self.listeners.add(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_assign_consecutive_offsets() {
        let log = MemoryCommitLog::new();
        assert_eq!(log.last_sequence_number(), SequencePosition::START_OF_TIME);

        let first = log.append(LogEntry::new(vec![1]), true).unwrap();
        let second = log.append(LogEntry::new(vec![2]), true).unwrap();
        assert_eq!(first.position(), Some(SequencePosition::new(1, 0)));
        assert_eq!(second.position(), Some(SequencePosition::new(1, 1)));
        assert_eq!(log.last_sequence_number(), SequencePosition::new(1, 1));
    }

    #[test]
    fn asynchronous_appends_settle_immediately() {
        let log = MemoryCommitLog::new();
        let outcome = log.append(LogEntry::new(vec![9]), false).unwrap();
        assert!(outcome.is_deferred());
        assert_eq!(outcome.wait().unwrap(), SequencePosition::new(1, 0));
    }

    #[test]
    fn closed_log_rejects_appends() {
        let log = MemoryCommitLog::new();
        log.close();
        assert!(log.is_closed());
        assert!(matches!(
            log.append(LogEntry::new(vec![1]), true),
            Err(LogError::Closed)
        ));
        assert!(matches!(log.start_writing(), Err(LogError::Closed)));
    }

    #[test]
    fn recover_replays_entries_after_checkpoint() {
        let log = MemoryCommitLog::new();
        for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            log.append(LogEntry::new(payload), true).unwrap().wait().unwrap();
        }

        let mut seen = Vec::new();
        log.recover(
            SequencePosition::new(1, 0),
            &mut |position: SequencePosition, entry: LogEntry| {
                seen.push((position.offset, entry.payload));
                Ok(())
            },
            false,
        )
        .unwrap();
        assert_eq!(seen, vec![(1, b"b".to_vec()), (2, b"c".to_vec())]);
    }

    #[test]
    fn clear_resets_the_log() {
        let log = MemoryCommitLog::new();
        let appended = log.append(LogEntry::new(vec![1]), true).unwrap();
        assert_eq!(appended.position(), Some(SequencePosition::new(1, 0)));
        log.clear().unwrap();
        assert_eq!(log.last_sequence_number(), SequencePosition::START_OF_TIME);

        let mut count = 0;
        log.recover(
            SequencePosition::START_OF_TIME,
            &mut |_position: SequencePosition, _entry: LogEntry| {
                count += 1;
                Ok(())
            },
            false,
        )
        .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn listeners_force_synchronous_appends() {
        struct Count(std::sync::atomic::AtomicUsize);
        impl CommitLogListener for Count {
            fn entry_appended(&self, _position: SequencePosition, _entry: &LogEntry) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let log = MemoryCommitLog::new();
        let listener = Arc::new(Count(std::sync::atomic::AtomicUsize::new(0)));
        log.add_listener(Arc::clone(&listener) as Arc<dyn CommitLogListener>);

        // Requested asynchronous, upgraded because a listener is present.
        let outcome = log.append(LogEntry::new(vec![1]), false).unwrap();
        assert!(!outcome.is_deferred());
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }
}
