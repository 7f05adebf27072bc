//! Persistent B+Tree over byte-string keys
//!
//! ## Design Principles
//! - **Disk-First**: fixed-size pages in one file, header in page 0
//! - **Generic**: leaves carry any [`Payload`] (identifier locations, posting runs)
//! - **Duplicate-Tolerant**: entries are ordered on `(key, seq)`; repeated keys
//!   either merge into the last entry for that key or chain a new one
//! - **Bounded Memory**: every page access goes through the LRU [`PageCache`]
//!
//! ## Architecture
//! ```text
//! Memory:   [PageCache] <-LRU-> decoded pages (dirty until write-back)
//!              ↓ evict / flush_all     ↓ finalize: header commit
//! Disk:     [Page 0: header][Page 1][Page 2]...
//! ```
//!
//! ## Lifecycle
//! `Building` (insert only) → `Finalizing` (flush + header commit) → `ReadOnly`.
//! The header written at creation is marked unfinalized, so a reader can never
//! mistake an interrupted build for a usable index.

use super::key::{fold_query, normalize_key, EntryKey};
use super::page::{Absorb, LeafEntry, Node, Page, Payload};
use crate::cache::{CacheStats, PageCache};
use crate::config::{max_order, IndexConfig, MAX_KEY_LEN};
use crate::storage::PageStore;
use crate::types::{FieldKind, PageId, INVALID_PAGE_ID};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Magic number for tree headers (ASCII "SQBT")
const BTREE_MAGIC: u32 = 0x5442_5153;

/// Current header format version
const BTREE_VERSION: u32 = 1;

/// Persistent header stored in page 0.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct IndexHeader {
    magic: u32,
    version: u32,
    field: u8,
    order: u32,
    key_length: u32,
    page_size: u32,
    root_page_id: u64,
    /// Record locations stored (a merged posting counts once per location)
    record_count: u64,
    depth: u32,
    leaf_pages: u64,
    internal_pages: u64,
    truncated_keys: u64,
    finalized: bool,
}

/// Per-tree build parameters.
#[derive(Debug, Clone)]
pub struct BTreeConfig {
    pub field: FieldKind,

    /// Max entries per leaf and separators per internal node
    pub order: usize,

    /// Keys longer than this are truncated on insert
    pub key_length: usize,

    pub page_size: usize,

    /// Pages this tree may keep decoded in memory
    pub cache_pages: usize,

    pub sync_on_finalize: bool,
}

impl BTreeConfig {
    pub fn from_index_config(config: &IndexConfig, field: FieldKind, cache_pages: usize) -> Self {
        Self {
            field,
            order: config.order_for(field),
            key_length: config.key_lengths.get(field),
            page_size: config.page_size,
            cache_pages,
            sync_on_finalize: config.sync_on_finalize,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.key_length == 0 || self.key_length > MAX_KEY_LEN {
            return Err(StorageError::Configuration(format!(
                "key length {} outside [1, {}]",
                self.key_length, MAX_KEY_LEN
            )));
        }
        let fits = max_order(self.page_size, self.key_length);
        if self.order < 3 || self.order > fits {
            return Err(StorageError::Configuration(format!(
                "order {} outside [3, {}] for {} byte pages",
                self.order, fits, self.page_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Building,
    Finalizing,
    ReadOnly,
}

/// Where an insert landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Duplicate ordinal of the entry that holds the payload
    pub seq: u32,

    /// True when the payload merged into an existing entry
    pub merged: bool,

    /// True when the key was cut to the maximum key length
    pub truncated: bool,
}

/// B+Tree statistics
#[derive(Default, Debug, Clone)]
pub struct BTreeStats {
    pub record_count: u64,
    pub depth: usize,
    pub total_pages: u64,
    pub leaf_pages: u64,
    pub internal_pages: u64,
    pub splits: u64,
    pub truncated_keys: u64,
    pub empty_keys: u64,
    pub duplicate_entries: u64,
    pub cache: CacheStats,
}

pub struct BTree<P: Payload> {
    cache: PageCache<P>,
    config: BTreeConfig,
    state: TreeState,
    root_page_id: PageId,
    record_count: u64,
    depth: usize,
    leaf_pages: u64,
    internal_pages: u64,
    truncated_keys: u64,
    empty_keys: u64,
    duplicate_entries: u64,
    splits: u64,
}

impl<P: Payload> BTree<P> {
    /// Create a new, empty index file and enter the Building state.
    pub fn create(path: impl AsRef<Path>, config: BTreeConfig) -> Result<Self> {
        config.validate()?;

        let store = PageStore::create(path.as_ref(), config.page_size)?;
        let mut cache = PageCache::new(store, config.cache_pages);

        let root_page_id = cache.allocate()?;
        cache.insert_new(Page::new_leaf(root_page_id))?;
        cache.flush_all()?;

        let mut tree = Self {
            cache,
            config,
            state: TreeState::Building,
            root_page_id,
            record_count: 0,
            depth: 1,
            leaf_pages: 1,
            internal_pages: 0,
            truncated_keys: 0,
            empty_keys: 0,
            duplicate_entries: 0,
            splits: 0,
        };
        tree.commit_header(false)?;

        debug!(
            field = %tree.config.field,
            path = %path.as_ref().display(),
            order = tree.config.order,
            "created index"
        );
        Ok(tree)
    }

    /// Open a finalized index file read-only.
    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let store = PageStore::open(path.as_ref())?;
        let blob = store.read_header()?;
        let header: IndexHeader = bincode::deserialize(&blob)
            .map_err(|e| StorageError::Corruption(format!("Failed to deserialize index header: {}", e)))?;

        if header.magic != BTREE_MAGIC {
            return Err(StorageError::Corruption(format!(
                "Invalid index magic number: expected 0x{:08X}, got 0x{:08X}",
                BTREE_MAGIC, header.magic
            )));
        }
        if header.version != BTREE_VERSION {
            return Err(StorageError::Corruption(format!(
                "Unsupported index version: {}",
                header.version
            )));
        }
        if !header.finalized {
            return Err(StorageError::Usage(format!(
                "{} was never finalized; rebuild the index before querying it",
                path.as_ref().display()
            )));
        }
        if header.page_size as usize != store.page_size() {
            return Err(StorageError::Corruption(format!(
                "header page size {} disagrees with store page size {}",
                header.page_size,
                store.page_size()
            )));
        }

        let config = BTreeConfig {
            field: FieldKind::from_u8(header.field)?,
            order: header.order as usize,
            key_length: header.key_length as usize,
            page_size: header.page_size as usize,
            cache_pages,
            sync_on_finalize: false,
        };

        info!(
            field = %config.field,
            records = header.record_count,
            depth = header.depth,
            "opened index read-only"
        );

        Ok(Self {
            cache: PageCache::new(store, cache_pages),
            config,
            state: TreeState::ReadOnly,
            root_page_id: header.root_page_id,
            record_count: header.record_count,
            depth: header.depth as usize,
            leaf_pages: header.leaf_pages,
            internal_pages: header.internal_pages,
            truncated_keys: header.truncated_keys,
            empty_keys: 0,
            duplicate_entries: 0,
            splits: 0,
        })
    }

    pub fn field(&self) -> FieldKind {
        self.config.field
    }

    pub fn state(&self) -> TreeState {
        self.state
    }

    pub fn order(&self) -> usize {
        self.config.order
    }

    pub fn key_length(&self) -> usize {
        self.config.key_length
    }

    /// Number of record locations stored
    pub fn len(&self) -> u64 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn stats(&self) -> BTreeStats {
        BTreeStats {
            record_count: self.record_count,
            depth: self.depth,
            total_pages: self.leaf_pages + self.internal_pages,
            leaf_pages: self.leaf_pages,
            internal_pages: self.internal_pages,
            splits: self.splits,
            truncated_keys: self.truncated_keys,
            empty_keys: self.empty_keys,
            duplicate_entries: self.duplicate_entries,
            cache: self.cache.stats(),
        }
    }

    /// Insert `payload` under `raw_key`.
    ///
    /// Returns `None` when the key is empty (nothing stored).
    pub fn insert(&mut self, raw_key: &[u8], payload: P) -> Result<Option<InsertOutcome>> {
        self.ensure_state(TreeState::Building, "insert into")?;

        if raw_key.is_empty() {
            self.empty_keys += 1;
            warn!(field = %self.config.field, "ignoring empty key");
            return Ok(None);
        }

        let key = normalize_key(raw_key, self.config.key_length);
        if key.truncated {
            self.truncated_keys += 1;
            warn!(
                field = %self.config.field,
                key = %String::from_utf8_lossy(raw_key),
                max = self.config.key_length,
                "key exceeds maximum length, truncated"
            );
        }

        let records = payload.record_count();
        let (mut outcome, split) = self.insert_recursive(self.root_page_id, &key.bytes, payload)?;

        if let Some((separator, right_id)) = split {
            self.grow_root(separator, right_id)?;
        }

        if outcome.seq > 0 && !outcome.merged {
            self.duplicate_entries += 1;
        }
        outcome.truncated = key.truncated;
        self.record_count += records;
        Ok(Some(outcome))
    }

    /// Every entry stored under exactly `raw_key`, in `(key, seq)` order.
    pub fn lookup(&mut self, raw_key: &[u8]) -> Result<Vec<LeafEntry<P>>> {
        self.ensure_state(TreeState::ReadOnly, "look up in")?;

        let key = fold_query(raw_key);
        if key.is_empty() || key.len() > self.config.key_length {
            return Ok(Vec::new());
        }
        self.scan_from(&EntryKey::first(&key), |k| k == key.as_slice())
    }

    /// Every entry whose key starts with `raw_prefix`, in key order.
    pub fn lookup_prefix(&mut self, raw_prefix: &[u8]) -> Result<Vec<LeafEntry<P>>> {
        self.ensure_state(TreeState::ReadOnly, "look up in")?;

        let prefix = fold_query(raw_prefix);
        if prefix.len() > self.config.key_length {
            return Ok(Vec::new());
        }
        self.scan_from(&EntryKey::first(&prefix), |k| k.starts_with(&prefix))
    }

    /// Flush every dirty page and commit the header. Allowed exactly once.
    pub fn finalize(&mut self) -> Result<BTreeStats> {
        if self.state != TreeState::Building {
            return Err(StorageError::Usage(format!(
                "{} index already finalized",
                self.config.field
            )));
        }

        self.state = TreeState::Finalizing;
        let written = self.cache.flush_all()?;
        self.commit_header(true)?;
        if self.config.sync_on_finalize {
            self.cache.store_mut().sync()?;
        }
        self.state = TreeState::ReadOnly;

        if self.truncated_keys > 0 {
            warn!(
                field = %self.config.field,
                truncated = self.truncated_keys,
                "keys were truncated to the maximum key length"
            );
        }
        info!(
            field = %self.config.field,
            records = self.record_count,
            pages = self.leaf_pages + self.internal_pages,
            depth = self.depth,
            flushed = written,
            "index finalized"
        );
        Ok(self.stats())
    }

    /// Walk the whole tree and verify separator bounds, page sizes, uniform
    /// leaf depth and the leaf chain. Returns the number of leaf entries.
    pub fn check_invariants(&mut self) -> Result<u64> {
        let mut leaf_level = None;
        let entries = self.check_subtree(self.root_page_id, None, None, 1, &mut leaf_level)?;

        if leaf_level != Some(self.depth) {
            return Err(StorageError::Corruption(format!(
                "leaves at depth {:?}, header says {}",
                leaf_level, self.depth
            )));
        }

        // Leaf chain must visit every entry in strictly increasing order.
        let mut chained = 0u64;
        let mut last: Option<EntryKey> = None;
        let mut page_id = self.leftmost_leaf()?;
        while page_id != INVALID_PAGE_ID {
            let page = self.cache.get(page_id)?;
            let Node::Leaf { entries, next_leaf } = &page.node else {
                return Err(StorageError::Corruption(format!("page {} in leaf chain is internal", page_id)));
            };
            for entry in entries {
                if last.as_ref().is_some_and(|prev| prev >= &entry.key) {
                    return Err(StorageError::Corruption(format!(
                        "leaf chain out of order at page {}",
                        page_id
                    )));
                }
                last = Some(entry.key.clone());
                chained += 1;
            }
            page_id = *next_leaf;
        }

        if chained != entries {
            return Err(StorageError::Corruption(format!(
                "leaf chain holds {} entries, tree walk found {}",
                chained, entries
            )));
        }
        Ok(entries)
    }

    fn insert_recursive(
        &mut self,
        page_id: PageId,
        key: &[u8],
        payload: P,
    ) -> Result<(InsertOutcome, Option<(EntryKey, PageId)>)> {
        let page = self.cache.get(page_id)?;
        if page.is_leaf() {
            return self.insert_into_leaf(page_id, key, payload);
        }

        // (key, MAX) routes to the leaf holding the last entry for `key`.
        let child_id = page.child_for(&EntryKey::last(key))?;
        let (outcome, child_split) = self.insert_recursive(child_id, key, payload)?;

        let Some((separator, new_child_id)) = child_split else {
            return Ok((outcome, None));
        };

        let order = self.config.order;
        let page = self.cache.get_mut(page_id)?;
        let Node::Internal { separators, children } = &mut page.node else {
            return Err(StorageError::Corruption(format!("page {} changed kind during insert", page_id)));
        };
        let idx = separators.partition_point(|s| s < &separator);
        separators.insert(idx, separator);
        children.insert(idx + 1, new_child_id);

        if separators.len() > order {
            let split = self.split_internal(page_id)?;
            Ok((outcome, Some(split)))
        } else {
            Ok((outcome, None))
        }
    }

    fn insert_into_leaf(
        &mut self,
        page_id: PageId,
        key: &[u8],
        payload: P,
    ) -> Result<(InsertOutcome, Option<(EntryKey, PageId)>)> {
        let order = self.config.order;
        let usable = self.node_capacity();
        let max_entry = usable / 4;

        let page = self.cache.get_mut(page_id)?;
        let page_len = page.encoded_len();
        let Node::Leaf { entries, .. } = &mut page.node else {
            return Err(StorageError::Corruption(format!("page {} is not a leaf", page_id)));
        };

        // Entries for `key` (if any) sit immediately before `idx`.
        let idx = entries.partition_point(|e| e.key.key.as_slice() <= key);
        let mut payload = payload;
        let mut seq = 0;

        if idx > 0 && entries[idx - 1].key.key == key {
            let prev = &mut entries[idx - 1];
            let room = usable
                .saturating_sub(page_len)
                .min(max_entry.saturating_sub(prev.encoded_len()));

            match prev.payload.absorb(payload, room) {
                Absorb::Merged => {
                    let outcome = InsertOutcome {
                        seq: prev.key.seq,
                        merged: true,
                        truncated: false,
                    };
                    return Ok((outcome, None));
                }
                Absorb::Rejected(p) => {
                    payload = p;
                    seq = prev.key.seq.checked_add(1).ok_or_else(|| {
                        StorageError::Corruption(format!(
                            "duplicate counter overflow for key {}",
                            String::from_utf8_lossy(key)
                        ))
                    })?;
                }
            }
        }

        let entry = LeafEntry {
            key: EntryKey::new(key.to_vec(), seq),
            payload,
        };
        let new_len = page_len + entry.encoded_len();
        entries.insert(idx, entry);

        let over_count = entries.len() > order;
        let over_bytes = new_len > usable;
        let outcome = InsertOutcome {
            seq,
            merged: false,
            truncated: false,
        };

        // A midpoint split only fits when the bytes already fit.
        if over_count || over_bytes {
            let split = self.split_leaf(page_id, over_bytes)?;
            Ok((outcome, Some(split)))
        } else {
            Ok((outcome, None))
        }
    }

    /// Split a leaf. Returns (separator, new_page_id); the separator is the
    /// first key of the new right sibling.
    fn split_leaf(&mut self, page_id: PageId, balance_bytes: bool) -> Result<(EntryKey, PageId)> {
        let new_page_id = self.cache.allocate()?;

        let page = self.cache.get_mut(page_id)?;
        let Node::Leaf { entries, next_leaf } = &mut page.node else {
            return Err(StorageError::Corruption(format!("page {} is not a leaf", page_id)));
        };

        let mid = if balance_bytes {
            byte_split_point(entries)
        } else {
            entries.len() / 2
        };
        let right_entries = entries.split_off(mid);
        let separator = right_entries[0].key.clone();

        let right = Page {
            id: new_page_id,
            node: Node::Leaf {
                entries: right_entries,
                next_leaf: *next_leaf,
            },
        };
        *next_leaf = new_page_id;

        self.cache.insert_new(right)?;
        self.leaf_pages += 1;
        self.splits += 1;

        debug!(
            field = %self.config.field,
            left = page_id,
            right = new_page_id,
            separator = ?separator,
            "split leaf"
        );
        Ok((separator, new_page_id))
    }

    /// Split an internal node; the median separator moves up.
    fn split_internal(&mut self, page_id: PageId) -> Result<(EntryKey, PageId)> {
        let new_page_id = self.cache.allocate()?;

        let page = self.cache.get_mut(page_id)?;
        let Node::Internal { separators, children } = &mut page.node else {
            return Err(StorageError::Corruption(format!("page {} is not internal", page_id)));
        };

        let mid = separators.len() / 2;
        let mut right_separators = separators.split_off(mid);
        let promoted = right_separators.remove(0);
        let right_children = children.split_off(mid + 1);

        let right = Page {
            id: new_page_id,
            node: Node::Internal {
                separators: right_separators,
                children: right_children,
            },
        };

        self.cache.insert_new(right)?;
        self.internal_pages += 1;
        self.splits += 1;

        debug!(
            field = %self.config.field,
            left = page_id,
            right = new_page_id,
            "split internal node"
        );
        Ok((promoted, new_page_id))
    }

    fn grow_root(&mut self, separator: EntryKey, right_id: PageId) -> Result<()> {
        let new_root_id = self.cache.allocate()?;
        self.cache
            .insert_new(Page::new_root(new_root_id, separator, self.root_page_id, right_id))?;

        debug!(
            field = %self.config.field,
            old_root = self.root_page_id,
            new_root = new_root_id,
            depth = self.depth + 1,
            "root split"
        );

        self.root_page_id = new_root_id;
        self.internal_pages += 1;
        self.depth += 1;
        Ok(())
    }

    fn find_leaf(&mut self, target: &EntryKey) -> Result<PageId> {
        let mut page_id = self.root_page_id;
        loop {
            let page = self.cache.get(page_id)?;
            if page.is_leaf() {
                return Ok(page_id);
            }
            page_id = page.child_for(target)?;
        }
    }

    fn leftmost_leaf(&mut self) -> Result<PageId> {
        let mut page_id = self.root_page_id;
        loop {
            let page = self.cache.get(page_id)?;
            match &page.node {
                Node::Leaf { .. } => return Ok(page_id),
                Node::Internal { children, .. } => page_id = children[0],
            }
        }
    }

    /// Collect entries from `start` onwards while `matches` holds, following
    /// sibling links across leaves.
    fn scan_from<F>(&mut self, start: &EntryKey, matches: F) -> Result<Vec<LeafEntry<P>>>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut results = Vec::new();
        let mut page_id = self.find_leaf(start)?;

        loop {
            let page = self.cache.get(page_id)?;
            let Node::Leaf { entries, next_leaf } = &page.node else {
                return Err(StorageError::Corruption(format!("page {} is not a leaf", page_id)));
            };

            let begin = entries.partition_point(|e| &e.key < start);
            for entry in &entries[begin..] {
                if !matches(&entry.key.key) {
                    return Ok(results);
                }
                results.push(entry.clone());
            }

            if *next_leaf == INVALID_PAGE_ID {
                return Ok(results);
            }
            page_id = *next_leaf;
        }
    }

    fn check_subtree(
        &mut self,
        page_id: PageId,
        lower: Option<&EntryKey>,
        upper: Option<&EntryKey>,
        level: usize,
        leaf_level: &mut Option<usize>,
    ) -> Result<u64> {
        let page = self.cache.get(page_id)?.clone();
        page.validate()?;
        if page.encoded_len() > self.node_capacity() {
            return Err(StorageError::Corruption(format!(
                "page {} needs {} bytes, only {} fit",
                page_id,
                page.encoded_len(),
                self.node_capacity()
            )));
        }

        let in_bounds = |k: &EntryKey| lower.map_or(true, |lo| lo <= k) && upper.map_or(true, |hi| k < hi);

        match &page.node {
            Node::Leaf { entries, .. } => {
                match leaf_level {
                    Some(l) if *l != level => {
                        return Err(StorageError::Corruption(format!(
                            "leaf {} at depth {}, other leaves at depth {}",
                            page_id, level, l
                        )))
                    }
                    _ => *leaf_level = Some(level),
                }
                if let Some(bad) = entries.iter().find(|e| !in_bounds(&e.key)) {
                    return Err(StorageError::Corruption(format!(
                        "leaf {} key {:?} escapes its parent bounds",
                        page_id, bad.key
                    )));
                }
                Ok(entries.len() as u64)
            }
            Node::Internal { separators, children } => {
                if let Some(bad) = separators.iter().find(|s| !in_bounds(s)) {
                    return Err(StorageError::Corruption(format!(
                        "internal page {} separator {:?} escapes its parent bounds",
                        page_id, bad
                    )));
                }
                let mut total = 0;
                for (i, child) in children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(&separators[i - 1]) };
                    let hi = separators.get(i).or(upper);
                    total += self.check_subtree(*child, lo, hi, level + 1, leaf_level)?;
                }
                Ok(total)
            }
        }
    }

    /// Bytes a node may occupy inside one page
    fn node_capacity(&self) -> usize {
        self.cache.store().usable_size()
    }

    fn commit_header(&mut self, finalized: bool) -> Result<()> {
        let header = IndexHeader {
            magic: BTREE_MAGIC,
            version: BTREE_VERSION,
            field: self.config.field.to_u8(),
            order: self.config.order as u32,
            key_length: self.config.key_length as u32,
            page_size: self.config.page_size as u32,
            root_page_id: self.root_page_id,
            record_count: self.record_count,
            depth: self.depth as u32,
            leaf_pages: self.leaf_pages,
            internal_pages: self.internal_pages,
            truncated_keys: self.truncated_keys,
            finalized,
        };
        let blob = bincode::serialize(&header)?;
        self.cache.store_mut().write_header(&blob)
    }

    fn ensure_state(&self, wanted: TreeState, action: &str) -> Result<()> {
        if self.state == wanted {
            return Ok(());
        }
        let why = match self.state {
            TreeState::Building => "it is still being built",
            TreeState::Finalizing => "it is being finalized",
            TreeState::ReadOnly => "it is finalized and read-only",
        };
        Err(StorageError::Usage(format!(
            "cannot {} the {} index: {}",
            action, self.config.field, why
        )))
    }
}

/// Smallest split index whose left half holds at least half the bytes,
/// clamped so both halves keep one entry.
fn byte_split_point<P: Payload>(entries: &[LeafEntry<P>]) -> usize {
    let total: usize = entries.iter().map(|e| e.encoded_len()).sum();
    let mut running = 0;
    let mut mid = entries.len() / 2;
    for (i, entry) in entries.iter().enumerate() {
        running += entry.encoded_len();
        if running * 2 >= total {
            mid = i + 1;
            break;
        }
    }
    mid.clamp(1, entries.len().saturating_sub(1).max(1))
}
