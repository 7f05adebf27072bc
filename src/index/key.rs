//! Key normalization and the composite key stored in tree pages
//!
//! Keys are compared byte-wise after ASCII case folding and truncation to the
//! index's maximum key length. Inside pages every entry carries a `seq`: the
//! ordinal of that entry among entries with the same key. Ordering on
//! `(key, seq)` keeps every stored key unique, so separator invariants hold
//! even when thousands of records share one accession or keyword.

use crate::{Result, StorageError};
use std::fmt;

/// Outcome of preparing a raw key for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedKey {
    pub bytes: Vec<u8>,

    /// Set when the raw key was longer than the maximum and got cut
    pub truncated: bool,
}

/// Case-fold and bound a key for insertion.
pub fn normalize_key(raw: &[u8], max_len: usize) -> NormalizedKey {
    let truncated = raw.len() > max_len;
    let kept = if truncated { &raw[..max_len] } else { raw };
    NormalizedKey {
        bytes: kept.to_ascii_lowercase(),
        truncated,
    }
}

/// Case-fold a query key. Queries are not truncated: a query longer than the
/// maximum key length matches nothing, only the truncated form does.
pub fn fold_query(raw: &[u8]) -> Vec<u8> {
    raw.to_ascii_lowercase()
}

/// Key as stored in pages: the normalized bytes plus the duplicate ordinal.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub key: Vec<u8>,
    pub seq: u32,
}

impl EntryKey {
    pub fn new(key: Vec<u8>, seq: u32) -> Self {
        Self { key, seq }
    }

    /// Smallest composite key for `key`
    pub fn first(key: &[u8]) -> Self {
        Self::new(key.to_vec(), 0)
    }

    /// Largest composite key for `key`
    pub fn last(key: &[u8]) -> Self {
        Self::new(key.to_vec(), u32::MAX)
    }

    /// Encoded size: [len:u16][key][seq:u32]
    pub fn encoded_len(&self) -> usize {
        2 + self.key.len() + 4
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.seq.to_le_bytes());
    }

    /// Decode from the front of `buf`, returning the key and bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(StorageError::Corruption("key length cut short".into()));
        }
        let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let end = 2 + len + 4;
        if buf.len() < end {
            return Err(StorageError::Corruption(format!(
                "key of {} bytes overruns page ({} bytes left)",
                len,
                buf.len()
            )));
        }

        let key = buf[2..2 + len].to_vec();
        let seq = u32::from_le_bytes([buf[2 + len], buf[3 + len], buf[4 + len], buf[5 + len]]);
        Ok((Self { key, seq }, end))
    }
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", String::from_utf8_lossy(&self.key), self.seq)
    }
}
