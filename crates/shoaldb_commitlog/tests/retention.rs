//! Integration tests for segment retention and log truncation.

use shoaldb_commitlog::{
    CommitLog, EntryConsumer, LogConfig, LogEntry, LogError, LogResult, MemoryMetadataStore,
    MetadataStore, ReplicatedCommitLog, SequencePosition, TablespaceId,
};
use shoaldb_segstore::{MemorySegmentStore, NodeAddress, PreferLocalPlacement, SegmentStore};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn cluster() -> (Arc<MemorySegmentStore>, Arc<MemoryMetadataStore>) {
    let policy = Arc::new(PreferLocalPlacement::new(None));
    let store = Arc::new(MemorySegmentStore::new(policy));
    store.register_node(NodeAddress::new("node", 9000));
    (store, Arc::new(MemoryMetadataStore::new()))
}

fn new_log(
    tablespace: TablespaceId,
    store: &Arc<MemorySegmentStore>,
    metadata: &Arc<MemoryMetadataStore>,
    retention: Duration,
) -> ReplicatedCommitLog {
    ReplicatedCommitLog::new(
        tablespace,
        Arc::clone(store) as Arc<dyn SegmentStore>,
        Arc::clone(metadata) as Arc<dyn MetadataStore>,
        LogConfig::new().retention_period(retention),
    )
}

fn log_sync(log: &ReplicatedCommitLog, payload: Vec<u8>) -> SequencePosition {
    log.append(LogEntry::new(payload), true)
        .unwrap()
        .wait()
        .unwrap()
}

#[derive(Default)]
struct Collector {
    seen: Vec<(SequencePosition, Vec<u8>)>,
}

impl EntryConsumer for Collector {
    fn apply(&mut self, position: SequencePosition, entry: LogEntry) -> LogResult<()> {
        self.seen.push((position, entry.payload));
        Ok(())
    }
}

#[test]
fn retention_protects_the_current_and_last_written_segments() {
    let (store, metadata) = cluster();
    let space = TablespaceId::new();
    let log = new_log(space, &store, &metadata, Duration::from_millis(50));

    // Four segments; the last append went to segment 3, segment 4 is the
    // open one.
    log.start_writing().unwrap();
    log_sync(&log, b"s1".to_vec());
    log.start_writing().unwrap();
    log_sync(&log, b"s2".to_vec());
    log.start_writing().unwrap();
    let checkpoint = log_sync(&log, b"s3".to_vec());
    log.start_writing().unwrap();
    assert_eq!(log.active_segments(), vec![1, 2, 3, 4]);

    // Let every creation timestamp fall behind the cutoff. Only 1 and 2
    // are prunable: 3 is the last-written segment, 4 is current.
    thread::sleep(Duration::from_millis(80));
    log.drop_old_segments(checkpoint).unwrap();

    assert_eq!(log.active_segments(), vec![3, 4]);
    assert_eq!(store.segment_ids(), vec![3, 4]);
    let persisted = metadata.load_listing(&space).unwrap();
    assert_eq!(persisted.segment_ids(), vec![3, 4]);
    assert_eq!(persisted.first_segment_id, 1);
    log.close();
}

#[test]
fn retention_disabled_never_prunes() {
    let (store, metadata) = cluster();
    let space = TablespaceId::new();
    let log = new_log(space, &store, &metadata, Duration::ZERO);

    log.start_writing().unwrap();
    log_sync(&log, b"a".to_vec());
    log.start_writing().unwrap();

    thread::sleep(Duration::from_millis(30));
    log.drop_old_segments(SequencePosition::new(1, 0)).unwrap();
    assert_eq!(log.active_segments(), vec![1, 2]);
    assert_eq!(store.segment_ids(), vec![1, 2]);
    log.close();
}

#[test]
fn retention_within_the_window_prunes_nothing() {
    let (store, metadata) = cluster();
    let space = TablespaceId::new();
    let log = new_log(space, &store, &metadata, Duration::from_secs(3600));

    log.start_writing().unwrap();
    log_sync(&log, b"a".to_vec());
    log.start_writing().unwrap();

    log.drop_old_segments(SequencePosition::new(1, 0)).unwrap();
    assert_eq!(log.active_segments(), vec![1, 2]);
    log.close();
}

#[test]
fn retention_tolerates_externally_deleted_segments() {
    let (store, metadata) = cluster();
    let space = TablespaceId::new();
    let log = new_log(space, &store, &metadata, Duration::from_millis(50));

    log.start_writing().unwrap();
    log_sync(&log, b"s1".to_vec());
    log.start_writing().unwrap();
    log_sync(&log, b"s2".to_vec());
    log.start_writing().unwrap();

    // Segment 1 disappears behind the engine's back.
    store.delete_segment(1).unwrap();

    thread::sleep(Duration::from_millis(80));
    log.drop_old_segments(SequencePosition::new(2, 0)).unwrap();
    assert_eq!(log.active_segments(), vec![2, 3]);
    log.close();
}

#[test]
fn recovery_works_from_a_checkpoint_inside_the_retained_window() {
    let (store, metadata) = cluster();
    let space = TablespaceId::new();
    let log = new_log(space, &store, &metadata, Duration::from_millis(50));

    log.start_writing().unwrap();
    log_sync(&log, b"s1".to_vec());
    log.start_writing().unwrap();
    log_sync(&log, b"s2".to_vec());
    log.start_writing().unwrap();
    let checkpoint = log_sync(&log, b"s3".to_vec());
    log.start_writing().unwrap();

    thread::sleep(Duration::from_millis(80));
    log.drop_old_segments(checkpoint).unwrap();
    assert_eq!(log.active_segments(), vec![3, 4]);
    log.close();

    // A checkpoint inside the window replays only what follows it.
    let restarted = new_log(space, &store, &metadata, Duration::from_millis(50));
    let mut collector = Collector::default();
    restarted.recover(checkpoint, &mut collector, true).unwrap();
    assert!(collector.seen.is_empty());
    assert_eq!(restarted.last_sequence_number(), checkpoint);

    // An empty-state node cannot replay a pruned log from the beginning.
    let fresh = new_log(space, &store, &metadata, Duration::from_millis(50));
    let mut collector = Collector::default();
    let err = fresh
        .recover(SequencePosition::START_OF_TIME, &mut collector, false)
        .unwrap_err();
    assert!(matches!(err, LogError::FullResyncNeeded { .. }));
    assert!(fresh.is_failed());
}

#[test]
fn clear_truncates_everything_and_restarts_the_log() {
    let (store, metadata) = cluster();
    let space = TablespaceId::new();
    let log = new_log(space, &store, &metadata, Duration::from_secs(3600));

    log.start_writing().unwrap();
    log_sync(&log, b"gone".to_vec());
    log.clear().unwrap();

    assert!(log.active_segments().is_empty());
    assert!(store.segment_ids().is_empty());
    let persisted = metadata.load_listing(&space).unwrap();
    assert!(persisted.is_empty());
    assert_eq!(persisted.first_segment_id, -1);

    // Writing resumes in a brand-new segment with a fresh first id.
    log.start_writing().unwrap();
    let position = log_sync(&log, b"kept".to_vec());
    assert_eq!(position.segment_id, 2);
    log.close();

    let restarted = new_log(space, &store, &metadata, Duration::from_secs(3600));
    let mut collector = Collector::default();
    restarted
        .recover(SequencePosition::START_OF_TIME, &mut collector, true)
        .unwrap();
    let payloads: Vec<Vec<u8>> = collector.seen.iter().map(|(_, p)| p.clone()).collect();
    assert_eq!(payloads, vec![b"kept".to_vec()]);
}
