//! One field's index file, whichever specialization backs it

use crate::config::IndexConfig;
use crate::index::{BTreeConfig, BTreeStats, IdentifierIndex, PostingsIndex};
use crate::types::{FieldKind, RecordLocation};
use crate::{Result, StorageError};
use std::path::Path;

pub enum FieldIndex {
    Identifier(IdentifierIndex),
    Postings(PostingsIndex),
}

impl FieldIndex {
    /// Create `<db>.<ext>` for `field` in `dir`, truncating any previous file.
    pub fn create(dir: &Path, db_name: &str, field: FieldKind, config: &IndexConfig, cache_pages: usize) -> Result<Self> {
        let path = dir.join(field.file_name(db_name));
        let tree_config = BTreeConfig::from_index_config(config, field, cache_pages);
        if field.is_identifier() {
            Ok(FieldIndex::Identifier(IdentifierIndex::create(path, tree_config)?))
        } else {
            Ok(FieldIndex::Postings(PostingsIndex::create(path, tree_config)?))
        }
    }

    /// Open a finalized index read-only. The file must have been built for
    /// `field`.
    pub fn open(dir: &Path, db_name: &str, field: FieldKind, cache_pages: usize) -> Result<Self> {
        let path = dir.join(field.file_name(db_name));
        let index = if field.is_identifier() {
            FieldIndex::Identifier(IdentifierIndex::open(&path, cache_pages)?)
        } else {
            FieldIndex::Postings(PostingsIndex::open(&path, cache_pages)?)
        };
        if index.field() != field {
            return Err(StorageError::Configuration(format!(
                "{} holds the '{}' index, expected '{}'",
                path.display(),
                index.field(),
                field
            )));
        }
        Ok(index)
    }

    pub fn field(&self) -> FieldKind {
        match self {
            FieldIndex::Identifier(index) => index.field(),
            FieldIndex::Postings(index) => index.field(),
        }
    }

    pub fn insert(&mut self, key: &str, location: RecordLocation) -> Result<()> {
        match self {
            FieldIndex::Identifier(index) => index.insert(key, location).map(|_| ()),
            FieldIndex::Postings(index) => index.insert(key, location).map(|_| ()),
        }
    }

    pub fn lookup(&mut self, key: &str) -> Result<Vec<RecordLocation>> {
        match self {
            FieldIndex::Identifier(index) => Ok(index.lookup(key)?.into_iter().map(|e| e.location).collect()),
            FieldIndex::Postings(index) => index.lookup(key),
        }
    }

    /// Locations of every key starting with `prefix`, grouped by key in key order.
    pub fn lookup_prefix(&mut self, prefix: &str) -> Result<Vec<RecordLocation>> {
        match self {
            FieldIndex::Identifier(index) => Ok(index
                .lookup_prefix(prefix)?
                .into_iter()
                .map(|e| e.location)
                .collect()),
            FieldIndex::Postings(index) => Ok(index
                .lookup_prefix(prefix)?
                .into_iter()
                .flat_map(|list| list.locations)
                .collect()),
        }
    }

    pub fn finalize(&mut self) -> Result<BTreeStats> {
        match self {
            FieldIndex::Identifier(index) => index.finalize(),
            FieldIndex::Postings(index) => index.finalize(),
        }
    }

    pub fn stats(&self) -> BTreeStats {
        match self {
            FieldIndex::Identifier(index) => index.stats(),
            FieldIndex::Postings(index) => index.stats(),
        }
    }
}
