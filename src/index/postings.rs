//! Postings index: keyword, description-word and taxonomy terms
//!
//! A term maps to many record locations. Locations are kept in runs: each
//! leaf slot holds a run for one term, and a repeated term appends to the run
//! in its last slot while that slot still has room (bounded so one run never
//! takes more than a quarter of a page). When the run is full a new slot with
//! the next `seq` is chained after it, so a popular term becomes a sequence
//! of adjacent slots, possibly spanning several leaves.
//!
//! ## Run Layout
//! ```text
//! [count:u16][location 0: 12 bytes]...[location count-1]
//! ```

use super::btree::{BTree, BTreeConfig, BTreeStats};
use super::page::{Absorb, LeafEntry, Payload};
use crate::types::{FieldKind, RecordLocation, LOCATION_ENCODED_LEN};
use crate::{Result, StorageError};
use std::path::Path;

/// Leaf payload of a postings index: locations in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostingRun(pub Vec<RecordLocation>);

impl PostingRun {
    pub fn single(location: RecordLocation) -> Self {
        Self(vec![location])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Payload for PostingRun {
    fn encoded_len(&self) -> usize {
        2 + self.0.len() * LOCATION_ENCODED_LEN
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.0.len() as u16).to_le_bytes());
        for location in &self.0 {
            location.encode_into(buf);
        }
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(StorageError::Corruption("posting run count cut short".into()));
        }
        let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let end = 2 + count * LOCATION_ENCODED_LEN;
        if buf.len() < end {
            return Err(StorageError::Corruption(format!(
                "posting run of {} locations overruns page",
                count
            )));
        }

        let locations = buf[2..end]
            .chunks_exact(LOCATION_ENCODED_LEN)
            .map(RecordLocation::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok((Self(locations), end))
    }

    fn record_count(&self) -> u64 {
        self.0.len() as u64
    }

    fn absorb(&mut self, incoming: Self, room: usize) -> Absorb<Self> {
        let needed = incoming.0.len() * LOCATION_ENCODED_LEN;
        let fits_count = self.0.len() + incoming.0.len() <= u16::MAX as usize;
        if needed <= room && fits_count {
            self.0.extend(incoming.0);
            Absorb::Merged
        } else {
            Absorb::Rejected(incoming)
        }
    }
}

/// Every location stored under one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    pub key: String,
    pub locations: Vec<RecordLocation>,
}

pub struct PostingsIndex {
    tree: BTree<PostingRun>,
}

impl PostingsIndex {
    pub fn create(path: impl AsRef<Path>, config: BTreeConfig) -> Result<Self> {
        if config.field.is_identifier() {
            return Err(StorageError::Configuration(format!(
                "{} is an identifier field, not a postings field",
                config.field
            )));
        }
        Ok(Self {
            tree: BTree::create(path, config)?,
        })
    }

    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let tree: BTree<PostingRun> = BTree::open(path.as_ref(), cache_pages)?;
        if tree.field().is_identifier() {
            return Err(StorageError::Configuration(format!(
                "{} holds a {} index, not a postings index",
                path.as_ref().display(),
                tree.field()
            )));
        }
        Ok(Self { tree })
    }

    pub fn field(&self) -> FieldKind {
        self.tree.field()
    }

    /// Add one posting. Returns false when the term is empty.
    pub fn insert(&mut self, term: &str, location: RecordLocation) -> Result<bool> {
        let outcome = self.tree.insert(term.as_bytes(), PostingRun::single(location))?;
        Ok(outcome.is_some())
    }

    /// All locations for `term`, in stored order.
    pub fn lookup(&mut self, term: &str) -> Result<Vec<RecordLocation>> {
        let runs = self.tree.lookup(term.as_bytes())?;
        Ok(runs.into_iter().flat_map(|entry| entry.payload.0).collect())
    }

    /// Posting lists of every term starting with `prefix`, in term order.
    pub fn lookup_prefix(&mut self, prefix: &str) -> Result<Vec<PostingList>> {
        let runs = self.tree.lookup_prefix(prefix.as_bytes())?;
        Ok(group_runs(runs))
    }

    pub fn finalize(&mut self) -> Result<BTreeStats> {
        self.tree.finalize()
    }

    pub fn stats(&self) -> BTreeStats {
        self.tree.stats()
    }

    #[cfg(test)]
    pub(crate) fn tree_mut(&mut self) -> &mut BTree<PostingRun> {
        &mut self.tree
    }
}

/// Adjacent runs of the same term collapse into one list.
fn group_runs(runs: Vec<LeafEntry<PostingRun>>) -> Vec<PostingList> {
    let mut lists: Vec<PostingList> = Vec::new();
    for entry in runs {
        match lists.last_mut() {
            Some(last) if last.key.as_bytes() == entry.key.key.as_slice() => {
                last.locations.extend(entry.payload.0);
            }
            _ => lists.push(PostingList {
                key: String::from_utf8_lossy(&entry.key.key).into_owned(),
                locations: entry.payload.0,
            }),
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn config(field: FieldKind, order: usize) -> BTreeConfig {
        BTreeConfig {
            field,
            order,
            key_length: 15,
            page_size: 1024,
            cache_pages: 8,
            sync_on_finalize: false,
        }
    }

    fn create_test_index() -> (PostingsIndex, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let index = PostingsIndex::create(temp_dir.path().join("db.xkw"), config(FieldKind::Keyword, 8)).unwrap();
        (index, temp_dir)
    }

    #[test]
    fn test_globin_twice_keeps_both() {
        let (mut index, _temp) = create_test_index();
        index.insert("GLOBIN", RecordLocation::new(0, 100)).unwrap();
        index.insert("HEME", RecordLocation::new(0, 100)).unwrap();
        index.insert("GLOBIN", RecordLocation::new(3, 900)).unwrap();
        index.finalize().unwrap();

        assert_eq!(
            index.lookup("GLOBIN").unwrap(),
            vec![RecordLocation::new(0, 100), RecordLocation::new(3, 900)]
        );
        assert_eq!(index.stats().record_count, 3);
    }

    #[test]
    fn test_repeated_term_merges_into_one_slot() {
        let (mut index, _temp) = create_test_index();
        for i in 0..10 {
            index.insert("kinase", RecordLocation::new(0, i)).unwrap();
        }
        index.finalize().unwrap();

        let runs = index.tree_mut().lookup(b"kinase").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].payload.len(), 10);
        assert_eq!(index.stats().leaf_pages, 1);
    }

    #[test]
    fn test_popular_term_spans_pages() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db.xtx");
        let mut expected = BTreeSet::new();
        {
            let mut index = PostingsIndex::create(&path, config(FieldKind::Taxonomy, 8)).unwrap();
            for i in 0..3000u64 {
                let location = RecordLocation::new((i % 5) as u32, i * 37);
                index.insert("Homo sapiens", location).unwrap();
                expected.insert(location);
                if i % 100 == 0 {
                    index.insert(&format!("Mus {}", i), location).unwrap();
                }
            }
            let stats = index.finalize().unwrap();
            assert!(stats.leaf_pages > 10);
            assert!(index.tree_mut().check_invariants().is_ok());
        }

        let mut index = PostingsIndex::open(&path, 8).unwrap();
        let found = index.lookup("homo sapiens").unwrap();
        assert_eq!(found.len(), 3000);
        assert_eq!(found.into_iter().collect::<BTreeSet<_>>(), expected);
        assert_eq!(index.lookup("Mus 1200").unwrap(), vec![RecordLocation::new(0, 1200 * 37)]);
    }

    #[test]
    fn test_full_leaf_of_long_keys_splits_on_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db.xde");
        let order = crate::config::max_order(4096, 255);
        // sorts ahead of the runs, so a midpoint split would put all four
        // long keys and all three runs in the left half
        let long_key = |n: usize| format!("{}{}", "0".repeat(254), n);
        {
            let config = BTreeConfig {
                field: FieldKind::Description,
                order,
                key_length: 255,
                page_size: 4096,
                cache_pages: 8,
                sync_on_finalize: false,
            };
            let mut index = PostingsIndex::create(&path, config).unwrap();
            // three runs of 84 locations, each just under a quarter page
            for term in ["a1", "a2", "a3"] {
                for i in 0..84u64 {
                    index.insert(term, RecordLocation::new(1, i)).unwrap();
                }
            }
            for i in 0..7u64 {
                index.insert(&format!("c{}", i), RecordLocation::new(2, i)).unwrap();
            }
            for n in 0..3 {
                index.insert(&long_key(n), RecordLocation::new(3, n as u64)).unwrap();
            }
            // one entry over order and over the page at the same time
            index.insert(&long_key(3), RecordLocation::new(3, 3)).unwrap();

            assert_eq!(index.tree_mut().check_invariants().unwrap(), 3 + 7 + 4);
            let stats = index.finalize().unwrap();
            assert_eq!(stats.leaf_pages, 2);
            assert_eq!(index.tree_mut().check_invariants().unwrap(), 14);
        }

        let mut index = PostingsIndex::open(&path, 8).unwrap();
        for term in ["a1", "a2", "a3"] {
            let found = index.lookup(term).unwrap();
            assert_eq!(found, (0..84u64).map(|i| RecordLocation::new(1, i)).collect::<Vec<_>>());
        }
        for i in 0..7u64 {
            assert_eq!(index.lookup(&format!("C{}", i)).unwrap(), vec![RecordLocation::new(2, i)]);
        }
        for n in 0..4 {
            assert_eq!(index.lookup(&long_key(n)).unwrap(), vec![RecordLocation::new(3, n as u64)]);
        }
        assert!(index.tree_mut().check_invariants().is_ok());
    }

    #[test]
    fn test_prefix_groups_runs() {
        let (mut index, _temp) = create_test_index();
        for i in 0..200 {
            index.insert("hemoglobin", RecordLocation::new(1, i)).unwrap();
        }
        index.insert("hemopexin", RecordLocation::new(2, 0)).unwrap();
        index.insert("myoglobin", RecordLocation::new(2, 1)).unwrap();
        index.finalize().unwrap();

        let lists = index.lookup_prefix("HEMO").unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].key, "hemoglobin");
        assert_eq!(lists[0].locations.len(), 200);
        assert_eq!(lists[1].locations, vec![RecordLocation::new(2, 0)]);
    }

    #[test]
    fn test_absorb_respects_room() {
        let mut run = PostingRun::single(RecordLocation::new(0, 0));
        let incoming = PostingRun::single(RecordLocation::new(0, 1));
        assert!(matches!(run.absorb(incoming.clone(), 11), Absorb::Rejected(_)));
        assert!(matches!(run.absorb(incoming, 12), Absorb::Merged));
        assert_eq!(run.len(), 2);
    }

    #[test]
    fn test_rejects_identifier_field() {
        let temp_dir = TempDir::new().unwrap();
        let err = PostingsIndex::create(temp_dir.path().join("db.xid"), config(FieldKind::Id, 4))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
