//! Record location within a multi-file flat-file database

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded size: file number (u32) + byte offset (u64)
pub const LOCATION_ENCODED_LEN: usize = 12;

/// Identifies one record: which database file, and where in it the record starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordLocation {
    /// Index into the database's file list
    pub file_number: u32,

    /// Byte offset of the record's first line
    pub offset: u64,
}

impl RecordLocation {
    pub fn new(file_number: u32, offset: u64) -> Self {
        Self { file_number, offset }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.file_number.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < LOCATION_ENCODED_LEN {
            return Err(StorageError::Corruption(format!(
                "Record location needs {} bytes, got {}",
                LOCATION_ENCODED_LEN,
                buf.len()
            )));
        }

        let mut file = [0u8; 4];
        file.copy_from_slice(&buf[0..4]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[4..12]);

        Ok(Self {
            file_number: u32::from_le_bytes(file),
            offset: u64::from_le_bytes(offset),
        })
    }
}

impl From<(u32, u64)> for RecordLocation {
    fn from((file_number, offset): (u32, u64)) -> Self {
        Self::new(file_number, offset)
    }
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.file_number, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_short_buffer() {
        let err = RecordLocation::decode(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[test]
    fn test_encode_layout() {
        let mut buf = Vec::new();
        RecordLocation::new(3, 900).encode_into(&mut buf);
        assert_eq!(buf.len(), LOCATION_ENCODED_LEN);
        assert_eq!(&buf[0..4], &3u32.to_le_bytes());
        assert_eq!(RecordLocation::decode(&buf).unwrap(), RecordLocation::new(3, 900));
    }
}
