//! Segment listing.
//!
//! The listing is the durable record of which segments currently make up
//! one tablespace's log: the first segment ever created and the ordered
//! active segments with their creation timestamps. The engine mutates it
//! on rotation and retention and persists it through the metadata store
//! after every mutation; recovery and tailing read it to know which
//! segments to open.

use crate::error::{MetadataError, MetadataResult};

/// Magic bytes for an encoded segment listing.
pub const LISTING_MAGIC: [u8; 4] = *b"SLST";

/// Current listing format version.
pub const LISTING_VERSION: u16 = 1;

/// One active segment and its creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Segment id.
    pub segment_id: i64,
    /// Creation timestamp, epoch milliseconds.
    pub created_at_ms: i64,
}

/// Durable record of the segments constituting one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentListing {
    /// First segment ever created for this log, -1 until one exists.
    /// Once set it is never reassigned.
    pub first_segment_id: i64,
    /// Active segments in creation order. Never contains duplicate ids.
    pub segments: Vec<SegmentMeta>,
}

impl Default for SegmentListing {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentListing {
    /// Creates an empty listing.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first_segment_id: -1,
            segments: Vec::new(),
        }
    }

    /// Creates an empty listing whose first-segment marker is already set.
    /// Used when the log is truncated and restarted from a known id.
    #[must_use]
    pub const fn with_first_segment(first_segment_id: i64) -> Self {
        Self {
            first_segment_id,
            segments: Vec::new(),
        }
    }

    /// Appends a segment. Ignored if the id is already present.
    pub fn add(&mut self, segment_id: i64, created_at_ms: i64) {
        if self.contains(segment_id) {
            return;
        }
        self.segments.push(SegmentMeta {
            segment_id,
            created_at_ms,
        });
    }

    /// Removes a segment. Returns whether it was present.
    pub fn remove(&mut self, segment_id: i64) -> bool {
        let before = self.segments.len();
        self.segments.retain(|s| s.segment_id != segment_id);
        self.segments.len() != before
    }

    /// Returns true if the segment is active.
    #[must_use]
    pub fn contains(&self, segment_id: i64) -> bool {
        self.segments.iter().any(|s| s.segment_id == segment_id)
    }

    /// Returns the active segment ids in creation order.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<i64> {
        self.segments.iter().map(|s| s.segment_id).collect()
    }

    /// Returns the ids of segments created strictly before `cutoff_ms`,
    /// in creation order.
    #[must_use]
    pub fn segments_older_than(&self, cutoff_ms: i64) -> Vec<i64> {
        self.segments
            .iter()
            .filter(|s| s.created_at_ms < cutoff_ms)
            .map(|s| s.segment_id)
            .collect()
    }

    /// Returns the number of active segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if no segment is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Encodes the listing to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(18 + self.segments.len() * 16);

        buf.extend_from_slice(&LISTING_MAGIC);
        buf.extend_from_slice(&LISTING_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.first_segment_id.to_le_bytes());

        let count = u32::try_from(self.segments.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for segment in &self.segments {
            buf.extend_from_slice(&segment.segment_id.to_le_bytes());
            buf.extend_from_slice(&segment.created_at_ms.to_le_bytes());
        }

        buf
    }

    /// Decodes a listing from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Corrupted`] on a bad magic, an unsupported
    /// version, a truncated body, trailing bytes, or duplicate ids.
    pub fn decode(data: &[u8]) -> MetadataResult<Self> {
        let mut cursor = 0;

        if data.len() < 4 || data[0..4] != LISTING_MAGIC {
            return Err(MetadataError::corrupted("invalid listing magic"));
        }
        cursor += 4;

        let read_u16 = |cursor: &mut usize| -> MetadataResult<u16> {
            if *cursor + 2 > data.len() {
                return Err(MetadataError::corrupted("listing too short"));
            }
            let value = u16::from_le_bytes([data[*cursor], data[*cursor + 1]]);
            *cursor += 2;
            Ok(value)
        };
        let read_u32 = |cursor: &mut usize| -> MetadataResult<u32> {
            if *cursor + 4 > data.len() {
                return Err(MetadataError::corrupted("listing too short"));
            }
            let bytes: [u8; 4] = data[*cursor..*cursor + 4]
                .try_into()
                .map_err(|_| MetadataError::corrupted("invalid u32"))?;
            *cursor += 4;
            Ok(u32::from_le_bytes(bytes))
        };
        let read_i64 = |cursor: &mut usize| -> MetadataResult<i64> {
            if *cursor + 8 > data.len() {
                return Err(MetadataError::corrupted("listing too short"));
            }
            let bytes: [u8; 8] = data[*cursor..*cursor + 8]
                .try_into()
                .map_err(|_| MetadataError::corrupted("invalid i64"))?;
            *cursor += 8;
            Ok(i64::from_le_bytes(bytes))
        };

        let version = read_u16(&mut cursor)?;
        if version > LISTING_VERSION {
            return Err(MetadataError::corrupted(format!(
                "unsupported listing version: {version}"
            )));
        }

        let first_segment_id = read_i64(&mut cursor)?;
        let count = read_u32(&mut cursor)? as usize;

        let mut listing = Self {
            first_segment_id,
            segments: Vec::with_capacity(count),
        };
        for _ in 0..count {
            let segment_id = read_i64(&mut cursor)?;
            let created_at_ms = read_i64(&mut cursor)?;
            if listing.contains(segment_id) {
                return Err(MetadataError::corrupted(format!(
                    "duplicate segment id {segment_id}"
                )));
            }
            listing.segments.push(SegmentMeta {
                segment_id,
                created_at_ms,
            });
        }

        if cursor != data.len() {
            return Err(MetadataError::corrupted(format!(
                "trailing bytes in listing: expected {cursor} bytes, got {}",
                data.len()
            )));
        }

        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_listing() {
        let listing = SegmentListing::new();
        assert_eq!(listing.first_segment_id, -1);
        assert!(listing.is_empty());
        assert!(!listing.contains(0));
    }

    #[test]
    fn add_preserves_creation_order() {
        let mut listing = SegmentListing::new();
        listing.add(3, 100);
        listing.add(7, 200);
        listing.add(5, 300);
        assert_eq!(listing.segment_ids(), vec![3, 7, 5]);
        assert_eq!(listing.len(), 3);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let mut listing = SegmentListing::new();
        listing.add(3, 100);
        listing.add(3, 999);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.segments[0].created_at_ms, 100);
    }

    #[test]
    fn remove_reports_presence() {
        let mut listing = SegmentListing::new();
        listing.add(1, 10);
        listing.add(2, 20);
        assert!(listing.remove(1));
        assert!(!listing.remove(1));
        assert_eq!(listing.segment_ids(), vec![2]);
    }

    #[test]
    fn older_than_is_strict() {
        let mut listing = SegmentListing::new();
        listing.add(1, 100);
        listing.add(2, 200);
        listing.add(3, 300);
        assert_eq!(listing.segments_older_than(200), vec![1]);
        assert_eq!(listing.segments_older_than(301), vec![1, 2, 3]);
        assert!(listing.segments_older_than(100).is_empty());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut listing = SegmentListing::new();
        listing.first_segment_id = 4;
        listing.add(4, 1000);
        listing.add(9, 2000);

        let decoded = SegmentListing::decode(&listing.encode()).unwrap();
        assert_eq!(decoded, listing);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut data = SegmentListing::new().encode();
        data[0] = b'X';
        assert!(SegmentListing::decode(&data).is_err());
    }

    #[test]
    fn decode_rejects_future_version() {
        let mut data = SegmentListing::new().encode();
        data[4] = 0xFF;
        assert!(SegmentListing::decode(&data).is_err());
    }

    #[test]
    fn decode_rejects_truncation_and_trailing_bytes() {
        let mut listing = SegmentListing::new();
        listing.add(1, 10);
        let encoded = listing.encode();

        assert!(SegmentListing::decode(&encoded[..encoded.len() - 1]).is_err());

        let mut padded = encoded;
        padded.push(0);
        assert!(SegmentListing::decode(&padded).is_err());
    }

    #[test]
    fn decode_rejects_duplicate_ids() {
        let mut listing = SegmentListing::new();
        listing.add(1, 10);
        let mut data = listing.encode();
        // Append a second copy of the only segment record and fix the count.
        let record = data[18..34].to_vec();
        data.extend_from_slice(&record);
        data[14..18].copy_from_slice(&2u32.to_le_bytes());
        assert!(SegmentListing::decode(&data).is_err());
    }

    proptest! {
        /// Applying any add/remove sequence keeps ids unique and keeps the
        /// older-than query consistent with the stored timestamps.
        #[test]
        fn mutations_preserve_invariants(
            ops in proptest::collection::vec((0i64..20, 0i64..1000, proptest::bool::ANY), 0..40),
            cutoff in 0i64..1000,
        ) {
            let mut listing = SegmentListing::new();
            for (id, ts, is_add) in ops {
                if is_add {
                    listing.add(id, ts);
                } else {
                    listing.remove(id);
                }
            }

            let ids = listing.segment_ids();
            let unique: std::collections::HashSet<_> = ids.iter().collect();
            prop_assert_eq!(unique.len(), ids.len());

            for id in listing.segments_older_than(cutoff) {
                let meta = listing
                    .segments
                    .iter()
                    .find(|s| s.segment_id == id)
                    .expect("reported id must be active");
                prop_assert!(meta.created_at_ms < cutoff);
            }
        }
    }
}
