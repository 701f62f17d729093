//! Metadata store collaborator.
//!
//! The engine persists each tablespace's segment listing through this
//! trait. Clustered deployments wire it to the cluster metadata service;
//! [`FileMetadataStore`] covers single-node deployments and
//! [`MemoryMetadataStore`] covers tests.

use crate::error::{MetadataError, MetadataResult};
use crate::listing::SegmentListing;
use crate::types::TablespaceId;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Lock file guarding a metadata directory.
const LOCK_FILE: &str = "LOCK";

/// Durable storage for segment listings, one per tablespace.
///
/// Implementations must be atomic and read-your-writes: a listing saved
/// by one call is returned by every later load.
pub trait MetadataStore: Send + Sync {
    /// Loads the listing for a tablespace. Returns an empty listing if
    /// none was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if stored bytes exist but cannot be decoded, or
    /// on I/O failure.
    fn load_listing(&self, tablespace: &TablespaceId) -> MetadataResult<SegmentListing>;

    /// Saves the listing for a tablespace, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn save_listing(
        &self,
        tablespace: &TablespaceId,
        listing: &SegmentListing,
    ) -> MetadataResult<()>;
}

/// In-memory metadata store.
///
/// Listings are held encoded so loads exercise the same codec as the
/// durable implementations.
#[derive(Default)]
pub struct MemoryMetadataStore {
    listings: RwLock<HashMap<TablespaceId, Vec<u8>>>,
}

impl MemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn load_listing(&self, tablespace: &TablespaceId) -> MetadataResult<SegmentListing> {
        match self.listings.read().get(tablespace) {
            Some(data) => SegmentListing::decode(data),
            None => Ok(SegmentListing::new()),
        }
    }

    fn save_listing(
        &self,
        tablespace: &TablespaceId,
        listing: &SegmentListing,
    ) -> MetadataResult<()> {
        self.listings.write().insert(*tablespace, listing.encode());
        Ok(())
    }
}

/// File-backed metadata store: one listing file per tablespace under a
/// root directory, guarded by an exclusive lock file.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory; only one
/// instance can exist per directory at a time.
pub struct FileMetadataStore {
    /// Root directory path.
    root: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl FileMetadataStore {
    /// Opens or creates the metadata directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Locked`] if another process holds the
    /// directory, or an I/O error.
    pub fn open(root: &Path) -> MetadataResult<Self> {
        fs::create_dir_all(root)?;

        let lock_path = root.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(MetadataError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    fn listing_path(&self, tablespace: &TablespaceId) -> PathBuf {
        self.root.join(format!("{}.listing", tablespace.as_uuid()))
    }

    /// Fsyncs the directory so renames and deletions are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> MetadataResult<()> {
        let dir = File::open(&self.root)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> MetadataResult<()> {
        // NTFS journaling covers metadata durability; directory fsync is
        // not available on Windows.
        Ok(())
    }
}

impl MetadataStore for FileMetadataStore {
    fn load_listing(&self, tablespace: &TablespaceId) -> MetadataResult<SegmentListing> {
        let path = self.listing_path(tablespace);
        if !path.exists() {
            return Ok(SegmentListing::new());
        }

        let mut file = File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(SegmentListing::new());
        }
        SegmentListing::decode(&data)
    }

    fn save_listing(
        &self,
        tablespace: &TablespaceId,
        listing: &SegmentListing,
    ) -> MetadataResult<()> {
        let path = self.listing_path(tablespace);
        let temp_path = self.root.join(format!("{}.tmp", tablespace.as_uuid()));

        // Write-then-rename for crash safety.
        let data = listing.encode();
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        self.sync_directory()?;

        Ok(())
    }
}
