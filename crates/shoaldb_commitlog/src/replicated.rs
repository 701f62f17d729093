//! Replicated commit log engine.
//!
//! Entries are appended to segments hosted by an external
//! [`SegmentStore`]; the set of segments that currently constitute the
//! log is persisted through a [`MetadataStore`]. The append hot path is
//! lock-free: it reads the current writer as an atomic snapshot, while
//! rotation, retention and truncation serialize on one mutex that also
//! guards the cached listing.

use crate::commit_log::{AppendOutcome, CommitLog, CommitLogListener, EntryConsumer, ListenerSet};
use crate::config::LogConfig;
use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::listing::SegmentListing;
use crate::metadata::MetadataStore;
use crate::pending::{pending_pair, AppendCompletion};
use crate::position::SequencePosition;
use crate::types::TablespaceId;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use shoaldb_segstore::{
    OpenMode, ReplicaConfig, SegmentAppender, SegmentReader, SegmentStore, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Entries read from the store per batch during recovery replay.
const RECOVERY_BATCH: i64 = 10_000;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Writer for the currently open segment.
///
/// Replaced wholesale on rotation, never mutated; append snapshots the
/// reference and uses whichever writer it observed.
struct CommitWriter {
    segment_id: i64,
    appender: Box<dyn SegmentAppender>,
}

impl CommitWriter {
    fn close(&self) {
        if let Err(err) = self.appender.close() {
            warn!(segment = self.segment_id, %err, "error while closing segment writer");
        }
    }
}

struct LogInner {
    tablespace: TablespaceId,
    store: Arc<dyn SegmentStore>,
    metadata: Arc<dyn MetadataStore>,
    config: LogConfig,
    writer: ArcSwapOption<CommitWriter>,
    /// Cached copy of the persisted listing. The mutex doubles as the
    /// exclusive section for rotation, retention and truncation.
    listing: Mutex<SegmentListing>,
    current_segment: AtomicI64,
    last_segment: AtomicI64,
    last_offset: AtomicI64,
    closed: AtomicBool,
    failed: AtomicBool,
    listeners: ListenerSet,
}

impl LogInner {
    fn last_position(&self) -> SequencePosition {
        SequencePosition::new(
            self.last_segment.load(Ordering::SeqCst),
            self.last_offset.load(Ordering::SeqCst),
        )
    }

    /// Runs on the store's completion context for every append.
    fn settle_append(
        &self,
        segment_id: i64,
        result: Result<i64, StoreError>,
        completion: AppendCompletion,
    ) {
        match result {
            Ok(offset) => {
                if self.last_segment.load(Ordering::SeqCst) == segment_id {
                    self.last_offset.fetch_max(offset, Ordering::SeqCst);
                }
                completion.complete(Ok(SequencePosition::new(segment_id, offset)));
            }
            Err(err) => {
                let err = LogError::Store(err);
                self.fault(&err);
                completion.complete(Err(err));
            }
        }
    }

    /// Fault classification for failed append completions. Fenced and
    /// insufficient-replica failures are unrecoverable for this writer;
    /// the database layer must fail over to a new leader.
    fn fault(&self, err: &LogError) {
        if let LogError::Store(StoreError::SegmentClosed { segment_id }) = err {
            warn!(
                tablespace = %self.tablespace,
                segment = segment_id,
                "segment already closed, a new segment must be opened"
            );
            return;
        }
        if err.is_fatal() {
            error!(
                tablespace = %self.tablespace,
                %err,
                "unrecoverable append failure, failing the log"
            );
            self.close();
            self.failed.store(true, Ordering::SeqCst);
            return;
        }
        error!(tablespace = %self.tablespace, %err, "append failed");
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.listing.lock();
        self.close_current_writer();
        info!(tablespace = %self.tablespace, "commit log closed");
    }

    fn close_current_writer(&self) {
        if let Some(writer) = self.writer.swap(None) {
            writer.close();
        }
    }

    /// Rotation: closes the previous writer, creates a fresh segment and
    /// records it in the listing. The writer is published only after the
    /// listing hit the metadata store, so a failed rotation leaves no
    /// half-opened state behind.
    fn open_new_segment(&self) -> LogResult<()> {
        let mut listing = self.listing.lock();
        self.close_current_writer();
        let replica = ReplicaConfig {
            replica_set_size: self.config.replica_set_size,
            write_quorum: self.config.write_quorum,
            ack_quorum: self.config.ack_quorum,
            auth_secret: self.config.auth_secret.clone(),
        };
        let appender = self.store.create_segment(&replica)?;
        let segment_id = appender.segment_id();
        self.current_segment.store(segment_id, Ordering::SeqCst);
        if listing.first_segment_id < 0 {
            listing.first_segment_id = segment_id;
        }
        listing.add(segment_id, now_millis());
        self.metadata.save_listing(&self.tablespace, &listing)?;
        self.writer
            .store(Some(Arc::new(CommitWriter { segment_id, appender })));
        info!(tablespace = %self.tablespace, segment = segment_id, "opened new segment");
        Ok(())
    }

    fn replay_segments(
        &self,
        listing: &SegmentListing,
        checkpoint: SequencePosition,
        consumer: &mut dyn EntryConsumer,
        fence: bool,
    ) -> LogResult<()> {
        for segment_id in listing.segment_ids() {
            if segment_id < checkpoint.segment_id {
                debug!(segment = segment_id, "skipping segment before checkpoint");
                continue;
            }
            let mode = if fence { OpenMode::Recover } else { OpenMode::Tail };
            let reader = self
                .store
                .open_segment(segment_id, mode, &self.config.auth_secret)?;
            let replayed = self.replay_one(reader.as_ref(), segment_id, checkpoint, consumer);
            let closed = reader.close().map_err(LogError::from);
            replayed.and(closed)?;
        }
        info!(tablespace = %self.tablespace, last = %self.last_position(), "recovery complete");
        Ok(())
    }

    fn replay_one(
        &self,
        reader: &dyn SegmentReader,
        segment_id: i64,
        checkpoint: SequencePosition,
        consumer: &mut dyn EntryConsumer,
    ) -> LogResult<()> {
        let first = if segment_id == checkpoint.segment_id {
            checkpoint.offset
        } else {
            0
        };
        let confirmed = reader.last_confirmed()?;
        debug!(segment = segment_id, first, confirmed, "replaying segment");
        if confirmed < 0 {
            return Ok(());
        }
        let mut batch_start = first;
        while batch_start <= confirmed {
            let batch_end = (batch_start + RECOVERY_BATCH).min(confirmed);
            let expected = (batch_end - batch_start + 1) as usize;
            let entries = reader.read_entries(batch_start, batch_end)?;
            let actual = entries.len();
            for stored in entries {
                let position = SequencePosition::new(segment_id, stored.offset);
                let entry = LogEntry::decode(&stored.payload)?;
                self.last_segment.store(segment_id, Ordering::SeqCst);
                self.current_segment.store(segment_id, Ordering::SeqCst);
                self.last_offset.store(stored.offset, Ordering::SeqCst);
                if position.after(&checkpoint) {
                    consumer.apply(position, entry)?;
                }
            }
            if actual != expected {
                return Err(LogError::ShortRead {
                    segment_id,
                    expected,
                    actual,
                });
            }
            self.last_segment.store(segment_id, Ordering::SeqCst);
            self.last_offset.store(batch_end, Ordering::SeqCst);
            batch_start = batch_end + 1;
        }
        Ok(())
    }

    /// Delivers everything after `next_entry` in one segment, leaving
    /// `next_entry` untouched so the caller's cursor carries over exactly
    /// as consumed offsets dictate.
    fn tail_one(
        &self,
        reader: &dyn SegmentReader,
        segment_id: i64,
        next_entry: &mut i64,
        consumer: &mut dyn EntryConsumer,
    ) -> LogResult<()> {
        let confirmed = reader.last_confirmed()?;
        debug!(segment = segment_id, confirmed, next = *next_entry, "tailing segment");
        if *next_entry > confirmed {
            // Nothing new here; the next segment starts over from 0.
            *next_entry = 0;
            return Ok(());
        }
        for stored in reader.read_entries(*next_entry, confirmed)? {
            let position = SequencePosition::new(segment_id, stored.offset);
            let entry = LogEntry::decode(&stored.payload)?;
            self.last_segment.store(segment_id, Ordering::SeqCst);
            self.current_segment.store(segment_id, Ordering::SeqCst);
            // Unlike recovery, the tracked offset only ever moves forward
            // here, even when the pass crosses into a fresh segment.
            self.last_offset.fetch_max(stored.offset, Ordering::SeqCst);
            consumer.apply(position, entry)?;
        }
        Ok(())
    }
}

/// [`CommitLog`] replicated over an external segment store.
pub struct ReplicatedCommitLog {
    inner: Arc<LogInner>,
}

impl ReplicatedCommitLog {
    /// Creates an engine for one tablespace. The log starts idle; call
    /// [`CommitLog::start_writing`] (leader) or one of the replay
    /// operations (replica) to put it to work.
    #[must_use]
    pub fn new(
        tablespace: TablespaceId,
        store: Arc<dyn SegmentStore>,
        metadata: Arc<dyn MetadataStore>,
        config: LogConfig,
    ) -> Self {
        Self {
            inner: Arc::new(LogInner {
                tablespace,
                store,
                metadata,
                config,
                writer: ArcSwapOption::const_empty(),
                listing: Mutex::new(SegmentListing::new()),
                current_segment: AtomicI64::new(0),
                last_segment: AtomicI64::new(-1),
                last_offset: AtomicI64::new(-1),
                closed: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                listeners: ListenerSet::default(),
            }),
        }
    }

    /// Returns the tablespace this log belongs to.
    #[must_use]
    pub fn tablespace(&self) -> TablespaceId {
        self.inner.tablespace
    }

    /// Segment ids in the cached listing, in creation order.
    #[must_use]
    pub fn active_segments(&self) -> Vec<i64> {
        self.inner.listing.lock().segment_ids()
    }
}

impl CommitLog for ReplicatedCommitLog {
    fn append(&self, entry: LogEntry, synchronous: bool) -> LogResult<AppendOutcome> {
        let synchronous = synchronous || !self.inner.listeners.is_empty();
        let writer = match self.inner.writer.load_full() {
            Some(writer) if !self.inner.closed.load(Ordering::SeqCst) => writer,
            _ => return Err(LogError::Closed),
        };
        let payload = entry.encode();
        let (pending, completion) = pending_pair();
        let segment_id = writer.segment_id;
        self.inner.last_segment.store(segment_id, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        writer.appender.append(
            payload,
            Box::new(move |result| inner.settle_append(segment_id, result, completion)),
        );
        if synchronous {
            let position = pending.wait()?;
            if self.inner.last_segment.load(Ordering::SeqCst) == position.segment_id {
                self.inner
                    .last_offset
                    .fetch_max(position.offset, Ordering::SeqCst);
            }
            self.inner.listeners.notify(position, &entry);
            return Ok(AppendOutcome::Durable(position));
        }
        Ok(AppendOutcome::Deferred(pending))
    }

    fn start_writing(&self) -> LogResult<()> {
        self.inner.config.validate()?;
        let listing = self.inner.metadata.load_listing(&self.inner.tablespace)?;
        *self.inner.listing.lock() = listing;
        self.inner.open_new_segment()
    }

    fn recover(
        &self,
        checkpoint: SequencePosition,
        consumer: &mut dyn EntryConsumer,
        fence: bool,
    ) -> LogResult<()> {
        let listing = self.inner.metadata.load_listing(&self.inner.tablespace)?;
        info!(
            tablespace = %self.inner.tablespace,
            segments = ?listing.segment_ids(),
            %checkpoint,
            fence,
            "recovering"
        );
        *self.inner.listing.lock() = listing.clone();
        self.inner
            .last_segment
            .store(checkpoint.segment_id, Ordering::SeqCst);
        self.inner
            .current_segment
            .store(checkpoint.segment_id, Ordering::SeqCst);
        self.inner
            .last_offset
            .store(checkpoint.offset, Ordering::SeqCst);

        if checkpoint.segment_id > 0
            && !listing.contains(checkpoint.segment_id)
            && !listing.is_empty()
        {
            self.inner.failed.store(true, Ordering::SeqCst);
            return Err(LogError::full_resync_needed(format!(
                "active segments {:?} no longer include checkpoint segment {}",
                listing.segment_ids(),
                checkpoint.segment_id
            )));
        }
        if checkpoint.is_start_of_time()
            && !listing.is_empty()
            && !listing.contains(listing.first_segment_id)
        {
            self.inner.failed.store(true, Ordering::SeqCst);
            return Err(LogError::full_resync_needed(format!(
                "local state is empty and active segments {:?} no longer include \
                 the first segment {}",
                listing.segment_ids(),
                listing.first_segment_id
            )));
        }

        let replayed = self
            .inner
            .replay_segments(&listing, checkpoint, consumer, fence);
        if let Err(err) = &replayed {
            error!(tablespace = %self.inner.tablespace, %err, "fatal error during recovery");
            self.inner.failed.store(true, Ordering::SeqCst);
        }
        replayed
    }

    fn follow_the_leader(
        &self,
        skip_past: SequencePosition,
        consumer: &mut dyn EntryConsumer,
    ) -> LogResult<()> {
        let listing = self.inner.metadata.load_listing(&self.inner.tablespace)?;
        let mut to_read = listing.segment_ids();
        if skip_past.segment_id != -1 {
            to_read.retain(|id| *id >= skip_past.segment_id);
        }
        let mut next_entry = skip_past.offset + 1;
        for segment_id in to_read {
            let reader = match self.inner.store.open_segment(
                segment_id,
                OpenMode::Tail,
                &self.inner.config.auth_secret,
            ) {
                Ok(reader) => reader,
                Err(StoreError::RecoveryInProgress { .. }) => {
                    warn!(
                        tablespace = %self.inner.tablespace,
                        segment = segment_id,
                        "segment recovery in progress, nothing to tail yet"
                    );
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            let tailed = self
                .inner
                .tail_one(reader.as_ref(), segment_id, &mut next_entry, consumer);
            if let Err(err) = reader.close() {
                warn!(segment = segment_id, %err, "error while closing segment reader");
            }
            tailed?;
        }
        Ok(())
    }

    fn drop_old_segments(&self, checkpoint: SequencePosition) -> LogResult<()> {
        if self.inner.config.retention_period.is_zero() {
            return Ok(());
        }
        let cutoff = now_millis() - self.inner.config.retention_period.as_millis() as i64;
        let mut listing = self.inner.listing.lock();
        let current = self.inner.current_segment.load(Ordering::SeqCst);
        let last = self.inner.last_segment.load(Ordering::SeqCst);
        let mut old = listing.segments_older_than(cutoff);
        old.retain(|id| *id != current && *id != last);
        if old.is_empty() {
            return Ok(());
        }
        debug!(
            tablespace = %self.inner.tablespace,
            %checkpoint,
            current,
            last,
            segments = ?old,
            "dropping segments outside the retention window"
        );
        for segment_id in old {
            listing.remove(segment_id);
            match self.inner.store.delete_segment(segment_id) {
                Ok(()) => {}
                Err(StoreError::SegmentNotFound { .. }) => {
                    warn!(segment = segment_id, "segment was already deleted");
                }
                Err(err) => return Err(err.into()),
            }
            self.inner.metadata.save_listing(&self.inner.tablespace, &listing)?;
            info!(tablespace = %self.inner.tablespace, segment = segment_id, "dropped segment");
        }
        Ok(())
    }

    fn clear(&self) -> LogResult<()> {
        let mut listing = self.inner.listing.lock();
        if self.inner.writer.load().is_some() {
            debug!(tablespace = %self.inner.tablespace, "closing open segment before truncation");
            self.inner.close_current_writer();
        }
        for segment_id in listing.segment_ids() {
            match self.inner.store.delete_segment(segment_id) {
                Ok(()) => debug!(segment = segment_id, "deleted segment"),
                Err(StoreError::SegmentNotFound { .. }) => {
                    warn!(segment = segment_id, "segment was already deleted");
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.inner.current_segment.store(0, Ordering::SeqCst);
        *listing = SegmentListing::new();
        self.inner.metadata.save_listing(&self.inner.tablespace, &listing)?;
        info!(tablespace = %self.inner.tablespace, "log truncated");
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    fn last_sequence_number(&self) -> SequencePosition {
        self.inner.last_position()
    }

    fn add_listener(&self, listener: Arc<dyn CommitLogListener>) {
        self.inner.listeners.add(listener);
    }
}
