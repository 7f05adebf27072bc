//! Identifier index: one record location per key occurrence
//!
//! Serves the ID, accession and sequence-version fields. Keys are expected to
//! be unique per field, but repeated identifiers are kept: each occurrence is
//! stored as its own entry whose `seq` is the number of earlier occurrences.

use super::btree::{BTree, BTreeConfig, BTreeStats};
use super::page::{Absorb, Payload};
use crate::types::{FieldKind, RecordLocation, LOCATION_ENCODED_LEN};
use crate::{Result, StorageError};
use std::path::Path;
use tracing::warn;

/// Leaf payload of an identifier index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdLocation(pub RecordLocation);

impl Payload for IdLocation {
    fn encoded_len(&self) -> usize {
        LOCATION_ENCODED_LEN
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.0.encode_into(buf);
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Ok((IdLocation(RecordLocation::decode(buf)?), LOCATION_ENCODED_LEN))
    }

    fn record_count(&self) -> u64 {
        1
    }

    fn absorb(&mut self, incoming: Self, _room: usize) -> Absorb<Self> {
        Absorb::Rejected(incoming)
    }
}

/// One stored identifier occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierEntry {
    /// Normalized (lower-cased, possibly truncated) key
    pub key: String,
    pub location: RecordLocation,
    /// Occurrences of the same key stored before this one
    pub duplicate_count: u32,
}

pub struct IdentifierIndex {
    tree: BTree<IdLocation>,
}

impl IdentifierIndex {
    pub fn create(path: impl AsRef<Path>, config: BTreeConfig) -> Result<Self> {
        if !config.field.is_identifier() {
            return Err(StorageError::Configuration(format!(
                "{} is not an identifier field",
                config.field
            )));
        }
        Ok(Self {
            tree: BTree::create(path, config)?,
        })
    }

    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let tree: BTree<IdLocation> = BTree::open(path.as_ref(), cache_pages)?;
        if !tree.field().is_identifier() {
            return Err(StorageError::Configuration(format!(
                "{} holds a {} index, not an identifier index",
                path.as_ref().display(),
                tree.field()
            )));
        }
        Ok(Self { tree })
    }

    pub fn field(&self) -> FieldKind {
        self.tree.field()
    }

    /// Store one occurrence of `key`. Returns the duplicate count assigned,
    /// or `None` for an empty key.
    pub fn insert(&mut self, key: &str, location: RecordLocation) -> Result<Option<u32>> {
        let Some(outcome) = self.tree.insert(key.as_bytes(), IdLocation(location))? else {
            return Ok(None);
        };

        if outcome.seq > 0 {
            warn!(
                field = %self.tree.field(),
                key,
                duplicates = outcome.seq,
                %location,
                "duplicate identifier"
            );
        }
        Ok(Some(outcome.seq))
    }

    /// All occurrences of `key`, in insertion order.
    pub fn lookup(&mut self, key: &str) -> Result<Vec<IdentifierEntry>> {
        let entries = self.tree.lookup(key.as_bytes())?;
        Ok(entries.into_iter().map(to_entry).collect())
    }

    /// All occurrences of every key starting with `prefix`, in key order.
    pub fn lookup_prefix(&mut self, prefix: &str) -> Result<Vec<IdentifierEntry>> {
        let entries = self.tree.lookup_prefix(prefix.as_bytes())?;
        Ok(entries.into_iter().map(to_entry).collect())
    }

    pub fn finalize(&mut self) -> Result<BTreeStats> {
        self.tree.finalize()
    }

    pub fn stats(&self) -> BTreeStats {
        self.tree.stats()
    }
}

fn to_entry(entry: super::page::LeafEntry<IdLocation>) -> IdentifierEntry {
    IdentifierEntry {
        key: String::from_utf8_lossy(&entry.key.key).into_owned(),
        location: entry.payload.0,
        duplicate_count: entry.key.seq,
    }
}
