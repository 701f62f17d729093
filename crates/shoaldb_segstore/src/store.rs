//! Segment store trait definitions.

use crate::error::StoreResult;

/// Completion callback for an asynchronous segment append.
///
/// Invoked exactly once, on the store's completion context, with the offset
/// assigned to the entry or the failure. Completions for one segment run in
/// submission order.
pub type AppendCallback = Box<dyn FnOnce(StoreResult<i64>) + Send>;

/// Replica parameters for a newly created segment.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Number of nodes holding a copy of the segment.
    pub replica_set_size: usize,
    /// Number of replicas each entry is written to.
    pub write_quorum: usize,
    /// Number of acknowledgements required before an append is durable.
    pub ack_quorum: usize,
    /// Secret required to open the segment later.
    pub auth_secret: Vec<u8>,
}

/// How a segment is opened for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fence the segment: seal it against its current writer and expose
    /// only the confirmed prefix. Used by a new leader during recovery.
    Recover,
    /// Leave the writer untouched. Used by replicas tailing a live leader.
    Tail,
}

/// One entry read back from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Offset of the entry within its segment.
    pub offset: i64,
    /// Entry payload, exactly as written.
    pub payload: Vec<u8>,
}

/// Exclusive write handle to one open segment.
///
/// At most one appender exists per segment; it is created by
/// [`SegmentStore::create_segment`] and invalidated when another process
/// fences the segment.
pub trait SegmentAppender: Send + Sync {
    /// Returns the id of the segment this handle writes to.
    fn segment_id(&self) -> i64;

    /// Submits `payload` for replicated append.
    ///
    /// The entry is assigned the next offset in submission order. The
    /// callback runs once the ack quorum has acknowledged the write, or
    /// once the append has failed.
    fn append(&self, payload: Vec<u8>, on_complete: AppendCallback);

    /// Returns the highest offset known durable on this handle, or -1 if
    /// no append has been confirmed yet.
    fn last_confirmed(&self) -> i64;

    /// Closes the handle after all previously submitted appends settle.
    /// Appends submitted after close fail with a segment-closed error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the close.
    fn close(&self) -> StoreResult<()>;
}

/// Read handle to one segment.
pub trait SegmentReader: Send + Sync {
    /// Returns the id of the segment this handle reads.
    fn segment_id(&self) -> i64;

    /// Returns the highest confirmed offset visible to this handle, or -1
    /// if the segment has no confirmed entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the store fails.
    fn last_confirmed(&self) -> StoreResult<i64>;

    /// Reads entries with offsets in `from..=to`, in ascending order.
    ///
    /// Offsets beyond the confirmed prefix are not served; the returned
    /// sequence may therefore be shorter than the requested range.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the store fails.
    fn read_entries(&self, from: i64, to: i64) -> StoreResult<Vec<SegmentEntry>>;

    /// Closes the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the close.
    fn close(&self) -> StoreResult<()>;
}

/// An append-only, replica-set-backed segment store.
///
/// The store hosts individually replicated segments; the commit log builds
/// its total order on top by chaining segments through its segment listing.
pub trait SegmentStore: Send + Sync {
    /// Creates a new segment backed by a replica set chosen through the
    /// store's placement policy, and returns its exclusive write handle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::InsufficientNodes`] if the placement
    /// policy cannot assemble a full replica set.
    fn create_segment(&self, config: &ReplicaConfig) -> StoreResult<Box<dyn SegmentAppender>>;

    /// Opens an existing segment for reading.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::SegmentNotFound`] for unknown ids,
    /// [`crate::StoreError::AuthFailed`] on a wrong secret, and
    /// [`crate::StoreError::RecoveryInProgress`] when a tail open races a
    /// new owner's recovery.
    fn open_segment(
        &self,
        segment_id: i64,
        mode: OpenMode,
        auth_secret: &[u8],
    ) -> StoreResult<Box<dyn SegmentReader>>;

    /// Deletes a segment and all of its replicas.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::SegmentNotFound`] if the segment does
    /// not exist (callers performing retention treat that as success).
    fn delete_segment(&self, segment_id: i64) -> StoreResult<()>;
}
