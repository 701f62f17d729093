//! Core type definitions for the commit log.

use std::fmt;
use uuid::Uuid;

/// Identifier of one logical log (tablespace).
///
/// Each tablespace owns an independent sequence of segments and an
/// independent segment listing in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TablespaceId(Uuid);

impl TablespaceId {
    /// Creates a fresh random tablespace id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TablespaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TablespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}
