//! Index Set Manager: the build-side contract drivers use
//!
//! ## Usage
//! ```ignore
//! let mut set = IndexSet::new("/idx/embl", "embl", IndexConfig::default());
//! set.set_source("/data/embl", vec!["est1.dat".into(), "est2.dat".into()])?;
//! set.set_fields("id,acc,key".parse()?)?;
//! set.open_caches()?;
//! for (location, fields) in records {
//!     set.insert_record(location, &fields)?;
//! }
//! let report = set.close_caches()?;
//! println!("{}", report);
//! ```
//!
//! Configuration happens once, before `open_caches`; after `close_caches` the
//! set is spent and its files belong to readers.

use super::field_index::FieldIndex;
use super::parameters::{BuildParameters, FieldSummary};
use crate::config::IndexConfig;
use crate::index::BTreeStats;
use crate::types::{FieldKind, FieldSet, RecordLocation};
use crate::{Result, StorageError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetState {
    Configuring,
    Building,
    Closed,
}

/// Per-field row of an [`IndexSetReport`].
#[derive(Debug, Clone)]
pub struct FieldReport {
    pub summary: FieldSummary,
    pub cache_hit_rate: f64,
    pub cache_evictions: u64,
}

/// Operational snapshot of an index set (page counts, tree depth).
#[derive(Debug, Clone)]
pub struct IndexSetReport {
    pub db_name: String,
    pub state: SetState,
    pub records_indexed: u64,
    pub fields: Vec<FieldReport>,
}

impl fmt::Display for IndexSetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index set '{}' ({:?}), {} records indexed", self.db_name, self.state, self.records_indexed)?;
        writeln!(
            f,
            "  {:<5} {:<16} {:>10} {:>6} {:>8} {:>9} {:>9} {:>8}",
            "field", "file", "entries", "depth", "leaves", "internal", "truncated", "hit rate"
        )?;
        for row in &self.fields {
            let s = &row.summary;
            writeln!(
                f,
                "  {:<5} {:<16} {:>10} {:>6} {:>8} {:>9} {:>9} {:>7.1}%",
                s.field.name(),
                s.file,
                s.records,
                s.depth,
                s.leaf_pages,
                s.internal_pages,
                s.truncated_keys,
                row.cache_hit_rate * 100.0
            )?;
        }
        Ok(())
    }
}

pub struct IndexSet {
    output_dir: PathBuf,
    db_name: String,
    config: IndexConfig,
    source_dir: Option<PathBuf>,
    files: Vec<String>,
    fields: FieldSet,
    release: Option<String>,
    date: Option<String>,
    state: SetState,
    indexes: BTreeMap<FieldKind, FieldIndex>,
    /// Final per-field reports, kept after the indexes are released
    closed: Vec<FieldReport>,
    records_indexed: u64,
}

impl IndexSet {
    pub fn new(output_dir: impl AsRef<Path>, db_name: impl Into<String>, config: IndexConfig) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            db_name: db_name.into(),
            config,
            source_dir: None,
            files: Vec::new(),
            fields: FieldSet::empty(),
            release: None,
            date: None,
            state: SetState::Configuring,
            indexes: BTreeMap::new(),
            closed: Vec::new(),
            records_indexed: 0,
        }
    }

    pub fn state(&self) -> SetState {
        self.state
    }

    pub fn fields(&self) -> FieldSet {
        self.fields
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Record the source directory and its database files; file number `n`
    /// in every [`RecordLocation`] refers to `files[n]`.
    pub fn set_source(&mut self, dir: impl AsRef<Path>, files: Vec<String>) -> Result<()> {
        self.ensure_state(SetState::Configuring, "set the source of")?;
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(StorageError::Configuration(format!(
                "source directory {} does not exist",
                dir.display()
            )));
        }
        self.source_dir = Some(dir.to_path_buf());
        self.files = files;
        Ok(())
    }

    /// Release and date strings copied into the parameters file.
    pub fn set_release(&mut self, release: impl Into<String>, date: impl Into<String>) -> Result<()> {
        self.ensure_state(SetState::Configuring, "set the release of")?;
        self.release = Some(release.into());
        self.date = Some(date.into());
        Ok(())
    }

    pub fn set_fields(&mut self, fields: FieldSet) -> Result<()> {
        self.ensure_state(SetState::Configuring, "set the fields of")?;
        self.fields = fields;
        Ok(())
    }

    /// Create one index file per requested field and start building.
    pub fn open_caches(&mut self) -> Result<()> {
        self.ensure_state(SetState::Configuring, "open")?;
        if self.fields.is_empty() {
            return Err(StorageError::Configuration(format!(
                "no fields requested for database '{}'",
                self.db_name
            )));
        }
        self.config.validate()?;
        std::fs::create_dir_all(&self.output_dir)?;

        let cache_pages = self.config.cache_pages_per_index(self.fields);
        for field in self.fields.iter() {
            let index = FieldIndex::create(&self.output_dir, &self.db_name, field, &self.config, cache_pages)?;
            self.indexes.insert(field, index);
        }
        self.state = SetState::Building;

        info!(
            db = %self.db_name,
            fields = %self.fields,
            cache_pages_per_index = cache_pages,
            dir = %self.output_dir.display(),
            "opened index caches"
        );
        Ok(())
    }

    /// Route one key to its field's index. Fields that were not requested
    /// are ignored.
    pub fn insert(&mut self, field: FieldKind, key: &str, location: RecordLocation) -> Result<()> {
        self.ensure_state(SetState::Building, "insert into")?;
        let Some(index) = self.indexes.get_mut(&field) else {
            return Ok(());
        };
        if let Err(source) = index.insert(key, location) {
            return Err(self.at_record(location, source));
        }
        Ok(())
    }

    /// Index every `(field, key)` pair extracted from one record.
    pub fn insert_record(&mut self, location: RecordLocation, keys: &[(FieldKind, &str)]) -> Result<()> {
        for (field, key) in keys {
            self.insert(*field, key, location)?;
        }
        self.records_indexed += 1;
        Ok(())
    }

    /// Finalize every index, write the parameters file and release the
    /// caches. On error no parameters file is written, so readers refuse the set.
    pub fn close_caches(&mut self) -> Result<IndexSetReport> {
        self.ensure_state(SetState::Building, "close")?;

        let mut reports = Vec::with_capacity(self.indexes.len());
        for (field, index) in self.indexes.iter_mut() {
            let stats = index.finalize()?;
            debug!(field = %field, records = stats.record_count, "closed index");
            reports.push(field_report(*field, &self.db_name, &stats));
        }

        let mut params = BuildParameters::new(&self.db_name, self.config.page_size, self.config.key_lengths.clone());
        params.source_dir = self.source_dir.clone();
        params.files = self.files.clone();
        params.fields = self.fields;
        params.release = self.release.clone();
        params.date = self.date.clone();
        params.indexes = reports.iter().map(|r| r.summary.clone()).collect();
        let params_path = params.write(&self.output_dir)?;

        self.indexes.clear();
        self.closed = reports;
        self.state = SetState::Closed;

        info!(
            db = %self.db_name,
            records = self.records_indexed,
            params = %params_path.display(),
            "index set closed"
        );
        Ok(self.dump_parameters())
    }

    /// Snapshot of page counts and depths; valid in every state.
    pub fn dump_parameters(&self) -> IndexSetReport {
        let fields = match self.state {
            SetState::Closed => self.closed.clone(),
            _ => self
                .indexes
                .iter()
                .map(|(field, index)| field_report(*field, &self.db_name, &index.stats()))
                .collect(),
        };
        IndexSetReport {
            db_name: self.db_name.clone(),
            state: self.state,
            records_indexed: self.records_indexed,
            fields,
        }
    }

    fn at_record(&self, location: RecordLocation, source: StorageError) -> StorageError {
        let file = self
            .files
            .get(location.file_number as usize)
            .cloned()
            .unwrap_or_else(|| format!("file #{}", location.file_number));
        StorageError::AtRecord {
            file,
            offset: location.offset,
            source: Box::new(source),
        }
    }

    fn ensure_state(&self, wanted: SetState, action: &str) -> Result<()> {
        if self.state == wanted {
            return Ok(());
        }
        Err(StorageError::Usage(format!(
            "cannot {} index set '{}' while {:?}",
            action, self.db_name, self.state
        )))
    }
}

fn field_report(field: FieldKind, db_name: &str, stats: &BTreeStats) -> FieldReport {
    FieldReport {
        summary: FieldSummary {
            field,
            file: field.file_name(db_name),
            records: stats.record_count,
            depth: stats.depth,
            leaf_pages: stats.leaf_pages,
            internal_pages: stats.internal_pages,
            truncated_keys: stats.truncated_keys,
            duplicate_entries: stats.duplicate_entries,
        },
        cache_hit_rate: stats.cache.hit_rate(),
        cache_evictions: stats.cache.evictions,
    }
}
