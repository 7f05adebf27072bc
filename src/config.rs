//! Index build configuration
//!
//! One [`IndexConfig`] drives a whole database build: the page geometry of
//! every index file, the shared page-cache budget, and the maximum key length
//! per field. It can be loaded from a JSON file so that drivers for different
//! database flavours keep their tuning next to the data.

use crate::types::{FieldKind, FieldSet, LOCATION_ENCODED_LEN};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default page size (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page we accept; anything smaller cannot hold a useful node
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page we accept (entry counts and key lengths in a page are u16)
pub const MAX_PAGE_SIZE: usize = 65536;

/// Default shared cache budget, in pages, for all fields together
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Lower bound on cached pages per open index
pub const MIN_CACHE_PAGES_PER_INDEX: usize = 8;

/// Default maximum key length for identifier fields (id, acc, sv)
pub const DEFAULT_ID_KEY_LEN: usize = 15;

/// Default maximum key length for keyword / description / taxonomy terms
pub const DEFAULT_TERM_KEY_LEN: usize = 15;

/// Hard upper bound for any key length
pub const MAX_KEY_LEN: usize = 255;

/// Per-entry bytes besides the key itself: key length (u16) + seq (u32)
pub(crate) const ENTRY_OVERHEAD: usize = 6;

/// Bytes a page loses to the store's CRC trailer and the node header
pub(crate) const PAGE_RESERVED: usize = 4 + 11;

/// Maximum key length per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLengths {
    pub id: usize,
    pub accession: usize,
    pub seq_version: usize,
    pub keyword: usize,
    pub description: usize,
    pub taxonomy: usize,
}

impl Default for KeyLengths {
    fn default() -> Self {
        Self {
            id: DEFAULT_ID_KEY_LEN,
            accession: DEFAULT_ID_KEY_LEN,
            seq_version: DEFAULT_ID_KEY_LEN,
            keyword: DEFAULT_TERM_KEY_LEN,
            description: DEFAULT_TERM_KEY_LEN,
            taxonomy: DEFAULT_TERM_KEY_LEN,
        }
    }
}

impl KeyLengths {
    pub fn get(&self, field: FieldKind) -> usize {
        match field {
            FieldKind::Id => self.id,
            FieldKind::Accession => self.accession,
            FieldKind::SeqVersion => self.seq_version,
            FieldKind::Keyword => self.keyword,
            FieldKind::Description => self.description,
            FieldKind::Taxonomy => self.taxonomy,
        }
    }

    pub fn set(&mut self, field: FieldKind, len: usize) {
        match field {
            FieldKind::Id => self.id = len,
            FieldKind::Accession => self.accession = len,
            FieldKind::SeqVersion => self.seq_version = len,
            FieldKind::Keyword => self.keyword = len,
            FieldKind::Description => self.description = len,
            FieldKind::Taxonomy => self.taxonomy = len,
        }
    }
}

/// Build configuration shared by every index of one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Page size for every index file (bytes)
    pub page_size: usize,

    /// Page-cache budget shared across all requested fields (pages)
    pub cache_pages: usize,

    /// Max entries per node; `None` derives it from page size and key length
    pub order: Option<usize>,

    /// Maximum key length per field; longer keys are truncated
    pub key_lengths: KeyLengths,

    /// fsync every index file when it is finalized
    pub sync_on_finalize: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            order: None,
            key_lengths: KeyLengths::default(),
            sync_on_finalize: true,
        }
    }
}

impl IndexConfig {
    /// Small pages and a tiny cache: exercises splits and eviction quickly.
    pub fn for_testing() -> Self {
        Self {
            page_size: 1024,
            cache_pages: 64,
            order: None,
            key_lengths: KeyLengths::default(),
            sync_on_finalize: false,
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_key_length(mut self, field: FieldKind, len: usize) -> Self {
        self.key_lengths.set(field, len);
        self
    }

    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: IndexConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(StorageError::Configuration(format!(
                "page_size {} outside [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }

        if self.cache_pages == 0 {
            return Err(StorageError::Configuration("cache_pages must be positive".into()));
        }

        for field in FieldKind::ALL {
            let len = self.key_lengths.get(field);
            if len == 0 || len > MAX_KEY_LEN {
                return Err(StorageError::Configuration(format!(
                    "key length {} for field '{}' outside [1, {}]",
                    len, field, MAX_KEY_LEN
                )));
            }
        }

        if let Some(order) = self.order {
            if order < 3 {
                return Err(StorageError::Configuration(format!(
                    "order {} too small (minimum 3)",
                    order
                )));
            }
            for field in FieldKind::ALL {
                let fits = max_order(self.page_size, self.key_lengths.get(field));
                if order > fits {
                    return Err(StorageError::Configuration(format!(
                        "order {} does not fit a {} byte page for field '{}' (max {})",
                        order, self.page_size, field, fits
                    )));
                }
            }
        }

        Ok(())
    }

    /// Effective node capacity for one field.
    pub fn order_for(&self, field: FieldKind) -> usize {
        self.order
            .unwrap_or_else(|| max_order(self.page_size, self.key_lengths.get(field)))
    }

    /// Cache pages granted to each index when `fields` are built together.
    pub fn cache_pages_per_index(&self, fields: FieldSet) -> usize {
        let n = fields.len().max(1);
        (self.cache_pages / n).max(MIN_CACHE_PAGES_PER_INDEX)
    }
}

/// Largest node capacity for which `order` internal separators, or `order`
/// single-location leaf entries, fit one page.
///
/// Posting runs grow past one location, so postings leaves can run out of
/// bytes before they reach `order` entries; those split on bytes instead.
pub fn max_order(page_size: usize, key_len: usize) -> usize {
    let per_entry = ENTRY_OVERHEAD + key_len + (8usize).max(LOCATION_ENCODED_LEN + 2);
    // one spare slot: a node is split only after it exceeds its order
    let usable = page_size.saturating_sub(PAGE_RESERVED + 8);
    (usable / per_entry).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexConfig::default();
        config.validate().unwrap();
        assert!(config.order_for(FieldKind::Id) > 50);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut config = IndexConfig::default();
        config.page_size = 100;
        assert!(config.validate().unwrap_err().is_configuration());

        let config = IndexConfig::for_testing().with_order(2);
        assert!(config.validate().is_err());

        let config = IndexConfig::for_testing().with_order(10_000);
        assert!(config.validate().is_err());

        let config = IndexConfig::default().with_key_length(FieldKind::Keyword, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_budget_split() {
        let config = IndexConfig {
            cache_pages: 600,
            ..Default::default()
        };
        let fields: FieldSet = "id,acc,des".parse().unwrap();
        assert_eq!(config.cache_pages_per_index(fields), 200);

        let tiny = IndexConfig {
            cache_pages: 10,
            ..Default::default()
        };
        assert_eq!(tiny.cache_pages_per_index(FieldSet::all()), MIN_CACHE_PAGES_PER_INDEX);
    }

    #[test]
    fn test_json_partial_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, r#"{ "page_size": 2048, "key_lengths": { "id": 20, "accession": 12, "seq_version": 15, "keyword": 30, "description": 15, "taxonomy": 40 } }"#).unwrap();

        let config = IndexConfig::from_json_file(&path).unwrap();
        assert_eq!(config.page_size, 2048);
        assert_eq!(config.cache_pages, DEFAULT_CACHE_PAGES);
        assert_eq!(config.key_lengths.get(FieldKind::Taxonomy), 40);
    }
}
