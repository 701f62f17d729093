//! Log entry envelope.
//!
//! The engine does not interpret the state changes it orders; an entry is
//! an opaque payload owned by the table/transaction layer. The envelope
//! adds only what replay needs: a format version and an exact length.

use crate::error::{LogError, LogResult};

/// Current entry envelope version.
pub const ENTRY_VERSION: u8 = 1;

/// One opaque state-change record carried by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Serialized state change, owned by the caller's layer.
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Wraps a payload in an entry.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Serializes the entry with its envelope.
    ///
    /// Layout: `version: u8`, `len: u32 LE`, payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.payload.len());
        buf.push(ENTRY_VERSION);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserializes an entry, validating the envelope exactly.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::EntryCorrupted`] on an unknown version, a
    /// truncated payload, or trailing bytes.
    pub fn decode(data: &[u8]) -> LogResult<Self> {
        if data.len() < 5 {
            return Err(LogError::entry_corrupted(format!(
                "envelope too short: {} bytes",
                data.len()
            )));
        }
        let version = data[0];
        if version != ENTRY_VERSION {
            return Err(LogError::entry_corrupted(format!(
                "unknown entry version {version}"
            )));
        }
        let len_bytes: [u8; 4] = data[1..5]
            .try_into()
            .map_err(|_| LogError::entry_corrupted("invalid length field"))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if data.len() != 5 + len {
            return Err(LogError::entry_corrupted(format!(
                "length mismatch: header says {len}, body has {}",
                data.len() - 5
            )));
        }
        Ok(Self {
            payload: data[5..].to_vec(),
        })
    }
}

impl From<Vec<u8>> for LogEntry {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&[u8]> for LogEntry {
    fn from(payload: &[u8]) -> Self {
        Self::new(payload.to_vec())
    }
}
