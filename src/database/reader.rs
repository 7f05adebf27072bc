//! Read-only query handle over a closed index set
//!
//! ```ignore
//! let reader = IndexSetReader::open("/idx/embl")?;
//! for location in reader.lookup(FieldKind::Accession, "P68871")? {
//!     println!("{} @ {}", reader.file_name(location.file_number).unwrap_or("?"), location.offset);
//! }
//! ```
//!
//! The handle is `Send + Sync`. Each field's tree sits behind its own mutex
//! because page-cache lookups reorder the LRU list; queries on different
//! fields never contend.

use super::field_index::FieldIndex;
use super::parameters::BuildParameters;
use crate::config::IndexConfig;
use crate::types::{FieldKind, FieldSet, RecordLocation};
use crate::{Result, StorageError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct IndexSetReader {
    dir: PathBuf,
    params: BuildParameters,
    indexes: BTreeMap<FieldKind, Mutex<FieldIndex>>,
}

impl IndexSetReader {
    /// Open the single index set stored in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(name) = BuildParameters::db_name_of(&path) {
                names.push(name.to_string());
            }
        }

        match names.as_slice() {
            [name] => Self::open_db(dir, name),
            [] => Err(StorageError::Configuration(format!(
                "no index set found in {}",
                dir.display()
            ))),
            _ => Err(StorageError::Configuration(format!(
                "{} holds several index sets ({}); name one",
                dir.display(),
                names.join(", ")
            ))),
        }
    }

    /// Open index set `db_name` in `dir` with the default cache budget.
    pub fn open_db(dir: impl AsRef<Path>, db_name: &str) -> Result<Self> {
        Self::open_with_cache(dir, db_name, IndexConfig::default().cache_pages)
    }

    /// Open with an explicit cache budget shared across all fields.
    pub fn open_with_cache(dir: impl AsRef<Path>, db_name: &str, cache_pages: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let params = BuildParameters::read(&dir, db_name)?;

        let per_index = IndexConfig {
            cache_pages,
            ..IndexConfig::default()
        }
        .cache_pages_per_index(params.fields);
        let mut indexes = BTreeMap::new();
        for field in params.fields.iter() {
            let index = FieldIndex::open(&dir, db_name, field, per_index)?;
            indexes.insert(field, Mutex::new(index));
        }

        info!(
            db = db_name,
            fields = %params.fields,
            files = params.files.len(),
            "opened index set"
        );
        Ok(Self { dir, params, indexes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn db_name(&self) -> &str {
        &self.params.db_name
    }

    pub fn fields(&self) -> FieldSet {
        self.params.fields
    }

    pub fn parameters(&self) -> &BuildParameters {
        &self.params
    }

    /// Every location stored under `key`: identifiers in insertion order,
    /// postings in stored order. An absent key yields an empty vector.
    pub fn lookup(&self, field: FieldKind, key: &str) -> Result<Vec<RecordLocation>> {
        self.index(field)?.lock().lookup(key)
    }

    pub fn lookup_prefix(&self, field: FieldKind, prefix: &str) -> Result<Vec<RecordLocation>> {
        self.index(field)?.lock().lookup_prefix(prefix)
    }

    /// Exact lookup, or a prefix scan when `pattern` ends in `*`.
    pub fn search(&self, field: FieldKind, pattern: &str) -> Result<Vec<RecordLocation>> {
        match pattern.strip_suffix('*') {
            Some(prefix) => self.lookup_prefix(field, prefix),
            None => self.lookup(field, pattern),
        }
    }

    /// Database file a location's file number refers to.
    pub fn file_name(&self, file_number: u32) -> Option<&str> {
        self.params.files.get(file_number as usize).map(String::as_str)
    }

    fn index(&self, field: FieldKind) -> Result<&Mutex<FieldIndex>> {
        self.indexes.get(&field).ok_or_else(|| {
            StorageError::Configuration(format!(
                "field '{}' is not indexed for database '{}'",
                field, self.params.db_name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::IndexSet;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build(dir: &Path, db: &str, records: &[(RecordLocation, Vec<(FieldKind, String)>)], fields: &str) {
        let mut set = IndexSet::new(dir, db, IndexConfig::for_testing().with_order(4));
        set.set_source(dir, vec!["a.dat".into(), "b.dat".into(), "c.dat".into(), "d.dat".into()])
            .unwrap();
        set.set_fields(fields.parse().unwrap()).unwrap();
        set.open_caches().unwrap();
        for (location, keys) in records {
            let keys: Vec<(FieldKind, &str)> = keys.iter().map(|(f, k)| (*f, k.as_str())).collect();
            set.insert_record(*location, &keys).unwrap();
        }
        set.close_caches().unwrap();
    }

    #[test]
    fn test_identifier_and_postings_scenarios() {
        let temp_dir = TempDir::new().unwrap();
        let records = vec![
            (RecordLocation::new(0, 100), vec![(FieldKind::Id, "ALPHA".to_string()), (FieldKind::Keyword, "GLOBIN".to_string())]),
            (RecordLocation::new(0, 250), vec![(FieldKind::Id, "BETA".to_string())]),
            (RecordLocation::new(1, 40), vec![(FieldKind::Id, "GAMMA".to_string())]),
            (RecordLocation::new(1, 310), vec![(FieldKind::Id, "DELTA".to_string())]),
            (RecordLocation::new(2, 5), vec![(FieldKind::Id, "EPSILON".to_string())]),
            (RecordLocation::new(3, 900), vec![(FieldKind::Keyword, "GLOBIN".to_string())]),
        ];
        build(temp_dir.path(), "embl", &records, "id,key");

        let reader = IndexSetReader::open(temp_dir.path()).unwrap();
        assert_eq!(reader.lookup(FieldKind::Id, "GAMMA").unwrap(), vec![RecordLocation::new(1, 40)]);
        assert!(reader.lookup(FieldKind::Id, "OMEGA").unwrap().is_empty());
        assert_eq!(
            reader.lookup(FieldKind::Keyword, "globin").unwrap(),
            vec![RecordLocation::new(0, 100), RecordLocation::new(3, 900)]
        );
        assert_eq!(reader.file_name(3), Some("d.dat"));
        assert_eq!(reader.file_name(4), None);

        let err = reader.lookup(FieldKind::Taxonomy, "Homo sapiens").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_round_trip_shuffled() {
        let temp_dir = TempDir::new().unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let mut records = Vec::new();
        let mut expected_acc: HashMap<String, Vec<RecordLocation>> = HashMap::new();
        let mut expected_des: HashMap<String, BTreeSet<RecordLocation>> = HashMap::new();
        let words = ["alpha", "beta", "chain", "globin", "hemoglobin", "subunit", "putative", "kinase"];

        let mut order: Vec<u64> = (0..600).collect();
        order.shuffle(&mut rng);
        for (n, i) in order.into_iter().enumerate() {
            let location = RecordLocation::new((n % 4) as u32, n as u64 * 512);
            // every 7th record repeats an accession
            let acc = format!("Q{:05}", if i % 7 == 0 { 7 } else { i });
            let word = words[(i % words.len() as u64) as usize].to_string();

            expected_acc.entry(acc.to_ascii_lowercase()).or_default().push(location);
            expected_des.entry(word.clone()).or_default().insert(location);
            records.push((location, vec![(FieldKind::Accession, acc), (FieldKind::Description, word)]));
        }
        build(temp_dir.path(), "trembl", &records, "acc,des");

        let reader = IndexSetReader::open_with_cache(temp_dir.path(), "trembl", 16).unwrap();
        for (acc, locations) in &expected_acc {
            assert_eq!(&reader.lookup(FieldKind::Accession, acc).unwrap(), locations);
        }
        for (word, locations) in &expected_des {
            let found: BTreeSet<_> = reader.lookup(FieldKind::Description, word).unwrap().into_iter().collect();
            assert_eq!(&found, locations);
        }
    }

    #[test]
    fn test_search_with_wildcard() {
        let temp_dir = TempDir::new().unwrap();
        let records = vec![
            (RecordLocation::new(0, 0), vec![(FieldKind::SeqVersion, "AB000263.1".to_string())]),
            (RecordLocation::new(0, 1), vec![(FieldKind::SeqVersion, "AB000264.2".to_string())]),
            (RecordLocation::new(0, 2), vec![(FieldKind::SeqVersion, "X52700.1".to_string())]),
        ];
        build(temp_dir.path(), "gb", &records, "sv");

        let reader = IndexSetReader::open_db(temp_dir.path(), "gb").unwrap();
        assert_eq!(reader.search(FieldKind::SeqVersion, "ab0002*").unwrap().len(), 2);
        assert_eq!(reader.search(FieldKind::SeqVersion, "X52700.1").unwrap(), vec![RecordLocation::new(0, 2)]);
        assert!(reader.search(FieldKind::SeqVersion, "X52700").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_readers() {
        let temp_dir = TempDir::new().unwrap();
        let records: Vec<_> = (0..300u64)
            .map(|i| (RecordLocation::new(0, i), vec![(FieldKind::Id, format!("SEQ{:04}", i))]))
            .collect();
        build(temp_dir.path(), "pdb", &records, "id");

        let reader = Arc::new(IndexSetReader::open(temp_dir.path()).unwrap());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let reader = Arc::clone(&reader);
                std::thread::spawn(move || {
                    for i in (t..300).step_by(4) {
                        let found = reader.lookup(FieldKind::Id, &format!("seq{:04}", i)).unwrap();
                        assert_eq!(found, vec![RecordLocation::new(0, i)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_cache_budget_split_like_builder() {
        let temp_dir = TempDir::new().unwrap();
        let records: Vec<_> = (0..50u64)
            .map(|i| {
                (
                    RecordLocation::new(0, i),
                    vec![(FieldKind::Id, format!("ID{}", i)), (FieldKind::Keyword, format!("kw{}", i % 3))],
                )
            })
            .collect();
        build(temp_dir.path(), "split", &records, "id,key");

        // a budget below the per-index floor still opens every field
        let reader = IndexSetReader::open_with_cache(temp_dir.path(), "split", 1).unwrap();
        assert_eq!(reader.lookup(FieldKind::Id, "id7").unwrap(), vec![RecordLocation::new(0, 7)]);
        assert_eq!(reader.lookup(FieldKind::Keyword, "kw1").unwrap().len(), 17);
        assert_eq!(
            IndexConfig { cache_pages: 1, ..IndexConfig::default() }.cache_pages_per_index(reader.fields()),
            crate::config::MIN_CACHE_PAGES_PER_INDEX
        );
    }

    #[test]
    fn test_unclosed_set_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let mut set = IndexSet::new(temp_dir.path(), "partial", IndexConfig::for_testing());
        set.set_fields("id".parse().unwrap()).unwrap();
        set.open_caches().unwrap();
        set.insert(FieldKind::Id, "HALF", RecordLocation::new(0, 0)).unwrap();
        drop(set);

        // no parameters file yet
        assert!(IndexSetReader::open(temp_dir.path()).err().unwrap().is_configuration());
        // and the index file itself is marked unfinalized
        assert!(FieldIndex::open(temp_dir.path(), "partial", FieldKind::Id, 8)
            .err()
            .unwrap()
            .is_usage());
    }
}
