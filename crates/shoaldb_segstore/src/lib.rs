//! # shoaldb segment store
//!
//! Append-only replicated segment store abstraction for the shoaldb
//! commit log.
//!
//! The commit log never talks to storage nodes directly. It works against
//! the traits in this crate:
//!
//! - [`SegmentStore`] creates, opens, and deletes segments
//! - [`SegmentAppender`] is the exclusive write handle to one segment
//! - [`SegmentReader`] reads a segment's confirmed entries
//! - [`PlacementPolicy`] decides which nodes back a new segment
//!
//! ## Semantics the log relies on
//!
//! - Appends complete asynchronously, off the caller's thread, in
//!   submission order per segment
//! - Opening a segment in [`OpenMode::Recover`] fences its writer
//! - Appends fail when live replicas drop below the ack quorum
//! - Deleting an unknown segment reports not-found, which retention
//!   treats as already-deleted
//!
//! ## Implementations
//!
//! [`MemorySegmentStore`] hosts segments in process memory while honoring
//! every semantic above; it serves tests and single-process deployments.
//! Networked stores plug in behind the same traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod node;
mod placement;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemorySegmentStore;
pub use node::NodeAddress;
pub use placement::{PlacementPolicy, PreferLocalPlacement};
pub use store::{
    AppendCallback, OpenMode, ReplicaConfig, SegmentAppender, SegmentEntry, SegmentReader,
    SegmentStore,
};
