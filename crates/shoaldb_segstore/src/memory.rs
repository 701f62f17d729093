//! In-process segment store.
//!
//! `MemorySegmentStore` keeps whole segments in memory while honoring the
//! store contract the commit log depends on: replica sets chosen through
//! the placement policy, append completions delivered off-caller and in
//! submission order, fencing on recovery opens, quorum loss when replica
//! nodes die, and an auth-secret check on open. It backs the engine's
//! tests and single-process deployments.

use crate::error::{StoreError, StoreResult};
use crate::node::NodeAddress;
use crate::placement::PlacementPolicy;
use crate::store::{
    AppendCallback, OpenMode, ReplicaConfig, SegmentAppender, SegmentEntry, SegmentReader,
    SegmentStore,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Work item for the completion dispatcher thread.
type CompletionJob = Box<dyn FnOnce() + Send>;

/// One in-memory segment and its replica bookkeeping.
struct MemorySegment {
    id: i64,
    replicas: Vec<NodeAddress>,
    auth_secret: Vec<u8>,
    ack_quorum: usize,
    /// Entry payloads, indexed by offset.
    entries: Mutex<Vec<Vec<u8>>>,
    /// Highest offset whose completion has run, -1 before the first.
    last_confirmed: AtomicI64,
    fenced: AtomicBool,
    /// Tail opens fail while a recovery open is simulated as in progress.
    recovering: AtomicBool,
}

impl MemorySegment {
    /// Seals the segment against its writer. Serialized with entry
    /// settlement through the entries lock.
    fn fence(&self) {
        let _entries = self.entries.lock();
        self.fenced.store(true, Ordering::SeqCst);
    }
}

/// State shared between the store, its handles, and the dispatcher.
struct StoreInner {
    segments: RwLock<HashMap<i64, Arc<MemorySegment>>>,
    next_segment_id: AtomicI64,
    nodes: RwLock<HashSet<NodeAddress>>,
    dead_nodes: RwLock<HashSet<NodeAddress>>,
    policy: Arc<dyn PlacementPolicy>,
    completions: Mutex<Option<Sender<CompletionJob>>>,
    fail_next_append: AtomicBool,
}

impl StoreInner {
    /// Hands a job to the dispatcher thread, or runs it inline once the
    /// dispatcher has shut down so no completion is ever lost.
    fn dispatch(&self, job: CompletionJob) {
        let sender = { self.completions.lock().clone() };
        let job = match sender {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::SendError(job)) => job,
            },
            None => job,
        };
        job();
    }

    /// Settles one append against its segment. Runs on the dispatcher, so
    /// offsets are assigned in submission order.
    fn settle_append(&self, segment: &MemorySegment, payload: Vec<u8>) -> StoreResult<i64> {
        let mut entries = segment.entries.lock();
        if segment.fenced.load(Ordering::SeqCst) {
            return Err(StoreError::SegmentFenced {
                segment_id: segment.id,
            });
        }
        if self.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected append failure"));
        }
        let dead = self.dead_nodes.read();
        let live = segment.replicas.iter().filter(|r| !dead.contains(r)).count();
        if live < segment.ack_quorum {
            return Err(StoreError::InsufficientNodes {
                requested: segment.ack_quorum,
                available: live,
            });
        }
        drop(dead);
        entries.push(payload);
        let offset = entries.len() as i64 - 1;
        segment.last_confirmed.fetch_max(offset, Ordering::SeqCst);
        Ok(offset)
    }
}

/// In-memory [`SegmentStore`] implementation.
///
/// # Thread Safety
///
/// The store and every handle it produces are safe to share across
/// threads. Append completions run on a dedicated dispatcher thread.
pub struct MemorySegmentStore {
    inner: Arc<StoreInner>,
    dispatcher: Option<JoinHandle<()>>,
}

impl MemorySegmentStore {
    /// Creates a store that places replicas through `policy`.
    #[must_use]
    pub fn new(policy: Arc<dyn PlacementPolicy>) -> Self {
        let (tx, rx) = mpsc::channel::<CompletionJob>();
        let dispatcher = thread::Builder::new()
            .name("segstore-completions".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .ok();
        let completions = if dispatcher.is_some() { Some(tx) } else { None };

        Self {
            inner: Arc::new(StoreInner {
                segments: RwLock::new(HashMap::new()),
                next_segment_id: AtomicI64::new(1),
                nodes: RwLock::new(HashSet::new()),
                dead_nodes: RwLock::new(HashSet::new()),
                policy,
                completions: Mutex::new(completions),
                fail_next_append: AtomicBool::new(false),
            }),
            dispatcher,
        }
    }

    /// Adds a storage node to the cluster.
    pub fn register_node(&self, node: NodeAddress) {
        let writable = {
            let mut nodes = self.inner.nodes.write();
            nodes.insert(node.clone());
            nodes.clone()
        };
        self.inner.dead_nodes.write().remove(&node);
        self.inner
            .policy
            .on_cluster_changed(&writable, &HashSet::new());
        debug!(node = %node, "registered storage node");
    }

    /// Removes a storage node from the cluster. Segments with fewer live
    /// replicas than their ack quorum start failing appends.
    pub fn kill_node(&self, node: &NodeAddress) {
        let writable = {
            let mut nodes = self.inner.nodes.write();
            nodes.remove(node);
            nodes.clone()
        };
        self.inner.dead_nodes.write().insert(node.clone());
        let dead = self
            .inner
            .policy
            .on_cluster_changed(&writable, &HashSet::new());
        warn!(node = %node, dead = dead.len(), "storage node removed from cluster");
    }

    /// Fails the next append settlement with an unavailable error. Test
    /// hook for transient store faults.
    pub fn fail_next_append(&self) {
        self.inner.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Marks a segment as under recovery, making tail opens fail with
    /// [`StoreError::RecoveryInProgress`] until cleared. Test hook.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SegmentNotFound`] for unknown ids.
    pub fn mark_recovering(&self, segment_id: i64, recovering: bool) -> StoreResult<()> {
        let segment = self.lookup(segment_id)?;
        segment.recovering.store(recovering, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the ids of all segments currently hosted, ascending.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.segments.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lookup(&self, segment_id: i64) -> StoreResult<Arc<MemorySegment>> {
        self.inner
            .segments
            .read()
            .get(&segment_id)
            .cloned()
            .ok_or(StoreError::SegmentNotFound { segment_id })
    }
}

impl SegmentStore for MemorySegmentStore {
    fn create_segment(&self, config: &ReplicaConfig) -> StoreResult<Box<dyn SegmentAppender>> {
        let replicas = self
            .inner
            .policy
            .select_replica_set(config.replica_set_size, &HashSet::new())?;
        let id = self.inner.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let segment = Arc::new(MemorySegment {
            id,
            replicas,
            auth_secret: config.auth_secret.clone(),
            ack_quorum: config.ack_quorum,
            entries: Mutex::new(Vec::new()),
            last_confirmed: AtomicI64::new(-1),
            fenced: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
        });
        debug!(
            segment_id = id,
            replicas = segment.replicas.len(),
            "created segment"
        );
        self.inner.segments.write().insert(id, Arc::clone(&segment));
        Ok(Box::new(MemoryAppender {
            inner: Arc::clone(&self.inner),
            segment,
            closed: AtomicBool::new(false),
        }))
    }

    fn open_segment(
        &self,
        segment_id: i64,
        mode: OpenMode,
        auth_secret: &[u8],
    ) -> StoreResult<Box<dyn SegmentReader>> {
        let segment = self.lookup(segment_id)?;
        if segment.auth_secret != auth_secret {
            return Err(StoreError::AuthFailed { segment_id });
        }
        match mode {
            OpenMode::Recover => {
                segment.fence();
                debug!(segment_id, "fenced segment for recovery");
            }
            OpenMode::Tail => {
                if segment.recovering.load(Ordering::SeqCst) {
                    return Err(StoreError::RecoveryInProgress { segment_id });
                }
            }
        }
        Ok(Box::new(MemoryReader {
            segment,
            closed: AtomicBool::new(false),
        }))
    }

    fn delete_segment(&self, segment_id: i64) -> StoreResult<()> {
        match self.inner.segments.write().remove(&segment_id) {
            Some(_) => {
                debug!(segment_id, "deleted segment");
                Ok(())
            }
            None => Err(StoreError::SegmentNotFound { segment_id }),
        }
    }
}

impl Drop for MemorySegmentStore {
    fn drop(&mut self) {
        // Closing the channel stops the dispatcher after the queue drains.
        self.inner.completions.lock().take();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

/// Write handle produced by [`MemorySegmentStore::create_segment`].
struct MemoryAppender {
    inner: Arc<StoreInner>,
    segment: Arc<MemorySegment>,
    closed: AtomicBool,
}

impl SegmentAppender for MemoryAppender {
    fn segment_id(&self) -> i64 {
        self.segment.id
    }

    fn append(&self, payload: Vec<u8>, on_complete: AppendCallback) {
        let segment_id = self.segment.id;
        if self.closed.load(Ordering::SeqCst) {
            self.inner.dispatch(Box::new(move || {
                on_complete(Err(StoreError::SegmentClosed { segment_id }));
            }));
            return;
        }
        let inner = Arc::clone(&self.inner);
        let segment = Arc::clone(&self.segment);
        self.inner.dispatch(Box::new(move || {
            on_complete(inner.settle_append(&segment, payload));
        }));
    }

    fn last_confirmed(&self) -> i64 {
        self.segment.last_confirmed.load(Ordering::SeqCst)
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Close only rejects new submissions; in-flight appends keep settling.
        debug!(segment_id = self.segment.id, "closed segment appender");
        Ok(())
    }
}

/// Read handle produced by [`MemorySegmentStore::open_segment`].
struct MemoryReader {
    segment: Arc<MemorySegment>,
    closed: AtomicBool,
}

impl SegmentReader for MemoryReader {
    fn segment_id(&self) -> i64 {
        self.segment.id
    }

    fn last_confirmed(&self) -> StoreResult<i64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::SegmentClosed {
                segment_id: self.segment.id,
            });
        }
        Ok(self.segment.last_confirmed.load(Ordering::SeqCst))
    }

    fn read_entries(&self, from: i64, to: i64) -> StoreResult<Vec<SegmentEntry>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::SegmentClosed {
                segment_id: self.segment.id,
            });
        }
        if from < 0 || to < from {
            return Ok(Vec::new());
        }
        let entries = self.segment.entries.lock();
        let confirmed = self.segment.last_confirmed.load(Ordering::SeqCst);
        let to = to.min(confirmed);
        let mut out = Vec::new();
        let mut offset = from;
        while offset <= to {
            if let Some(payload) = entries.get(offset as usize) {
                out.push(SegmentEntry {
                    offset,
                    payload: payload.clone(),
                });
            }
            offset += 1;
        }
        Ok(out)
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::PreferLocalPlacement;
    use std::time::Duration;

    fn store_with_nodes(count: u16) -> MemorySegmentStore {
        let policy = Arc::new(PreferLocalPlacement::new(None));
        let store = MemorySegmentStore::new(policy);
        for n in 0..count {
            store.register_node(NodeAddress::new("node", 9000 + n));
        }
        store
    }

    fn replica_config(size: usize, ack: usize) -> ReplicaConfig {
        ReplicaConfig {
            replica_set_size: size,
            write_quorum: size,
            ack_quorum: ack,
            auth_secret: b"secret".to_vec(),
        }
    }

    fn append_wait(appender: &dyn SegmentAppender, payload: &[u8]) -> StoreResult<i64> {
        let (tx, rx) = mpsc::channel();
        appender.append(
            payload.to_vec(),
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn segment_ids_are_monotonic() {
        let store = store_with_nodes(1);
        let a = store.create_segment(&replica_config(1, 1)).unwrap();
        let b = store.create_segment(&replica_config(1, 1)).unwrap();
        assert!(b.segment_id() > a.segment_id());
    }

    #[test]
    fn create_fails_without_enough_nodes() {
        let store = store_with_nodes(1);
        assert!(matches!(
            store.create_segment(&replica_config(3, 2)),
            Err(StoreError::InsufficientNodes { .. })
        ));
    }

    #[test]
    fn appends_settle_in_submission_order() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();

        let (tx, rx) = mpsc::channel();
        for i in 0..10u8 {
            let tx = tx.clone();
            appender.append(
                vec![i],
                Box::new(move |res| {
                    let _ = tx.send(res.unwrap());
                }),
            );
        }
        let offsets: Vec<i64> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(offsets, (0..10).collect::<Vec<i64>>());
        assert_eq!(appender.last_confirmed(), 9);
    }

    #[test]
    fn completion_runs_off_caller_thread() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();

        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        appender.append(
            vec![1],
            Box::new(move |_| {
                let _ = tx.send(thread::current().id());
            }),
        );
        let completion_thread = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(completion_thread, caller);
    }

    #[test]
    fn recovery_open_fences_writer() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        append_wait(appender.as_ref(), b"before").unwrap();

        let reader = store
            .open_segment(appender.segment_id(), OpenMode::Recover, b"secret")
            .unwrap();
        assert_eq!(reader.last_confirmed().unwrap(), 0);

        let err = append_wait(appender.as_ref(), b"after").unwrap_err();
        assert!(matches!(err, StoreError::SegmentFenced { .. }));
        // The fenced append left no trace.
        assert_eq!(reader.last_confirmed().unwrap(), 0);
    }

    #[test]
    fn tail_open_does_not_fence() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        append_wait(appender.as_ref(), b"a").unwrap();

        let reader = store
            .open_segment(appender.segment_id(), OpenMode::Tail, b"secret")
            .unwrap();
        assert_eq!(reader.last_confirmed().unwrap(), 0);

        assert_eq!(append_wait(appender.as_ref(), b"b").unwrap(), 1);
    }

    #[test]
    fn wrong_auth_secret_rejected() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        assert!(matches!(
            store.open_segment(appender.segment_id(), OpenMode::Tail, b"wrong"),
            Err(StoreError::AuthFailed { .. })
        ));
    }

    #[test]
    fn quorum_loss_fails_appends() {
        let store = store_with_nodes(2);
        let appender = store.create_segment(&replica_config(2, 2)).unwrap();
        append_wait(appender.as_ref(), b"ok").unwrap();

        store.kill_node(&NodeAddress::new("node", 9000));
        let err = append_wait(appender.as_ref(), b"lost").unwrap_err();
        assert!(matches!(err, StoreError::InsufficientNodes { .. }));
    }

    #[test]
    fn injected_failure_is_transient() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();

        store.fail_next_append();
        let err = append_wait(appender.as_ref(), b"boom").unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));

        assert_eq!(append_wait(appender.as_ref(), b"fine").unwrap(), 0);
    }

    #[test]
    fn closed_appender_rejects_appends() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        append_wait(appender.as_ref(), b"a").unwrap();
        appender.close().unwrap();

        let err = append_wait(appender.as_ref(), b"late").unwrap_err();
        assert!(matches!(err, StoreError::SegmentClosed { .. }));
    }

    #[test]
    fn reader_returns_requested_range() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        for i in 0..5u8 {
            append_wait(appender.as_ref(), &[i]).unwrap();
        }

        let reader = store
            .open_segment(appender.segment_id(), OpenMode::Tail, b"secret")
            .unwrap();
        let entries = reader.read_entries(1, 3).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].offset, 1);
        assert_eq!(entries[0].payload, vec![1]);
        assert_eq!(entries[2].offset, 3);
    }

    #[test]
    fn reader_never_serves_unconfirmed_offsets() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        append_wait(appender.as_ref(), b"only").unwrap();

        let reader = store
            .open_segment(appender.segment_id(), OpenMode::Tail, b"secret")
            .unwrap();
        let entries = reader.read_entries(0, 100).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn tail_open_fails_during_recovery() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        store.mark_recovering(appender.segment_id(), true).unwrap();

        assert!(matches!(
            store.open_segment(appender.segment_id(), OpenMode::Tail, b"secret"),
            Err(StoreError::RecoveryInProgress { .. })
        ));

        store.mark_recovering(appender.segment_id(), false).unwrap();
        assert!(store
            .open_segment(appender.segment_id(), OpenMode::Tail, b"secret")
            .is_ok());
    }

    #[test]
    fn delete_removes_segment() {
        let store = store_with_nodes(1);
        let appender = store.create_segment(&replica_config(1, 1)).unwrap();
        let id = appender.segment_id();

        store.delete_segment(id).unwrap();
        assert!(matches!(
            store.delete_segment(id),
            Err(StoreError::SegmentNotFound { .. })
        ));
        assert!(store.segment_ids().is_empty());
    }
}
