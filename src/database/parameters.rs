//! Build parameters file (`<db>.params.json`)
//!
//! Human-readable record of how an index set was built: source directory and
//! file list (file numbers in record locations index into it), requested
//! fields, release/date strings, and page geometry. Query tools read it to
//! resolve file numbers and to refuse index sets written by a newer format.
//!
//! Written once at close, via temp file + rename so a reader never sees a
//! half-written file.

use crate::config::KeyLengths;
use crate::types::{FieldKind, FieldSet};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Current parameters format version
pub const PARAMS_FORMAT_VERSION: u32 = 1;

const PARAMS_EXTENSION: &str = "params.json";

/// Per-field summary recorded at close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub field: FieldKind,
    pub file: String,
    pub records: u64,
    pub depth: usize,
    pub leaf_pages: u64,
    pub internal_pages: u64,
    #[serde(default)]
    pub truncated_keys: u64,
    #[serde(default)]
    pub duplicate_entries: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildParameters {
    pub format_version: u32,
    pub engine_version: String,
    pub db_name: String,
    pub source_dir: Option<PathBuf>,
    /// Database files in file-number order
    pub files: Vec<String>,
    pub fields: FieldSet,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub page_size: usize,
    pub key_lengths: KeyLengths,
    pub indexes: Vec<FieldSummary>,
}

impl BuildParameters {
    pub fn new(db_name: impl Into<String>, page_size: usize, key_lengths: KeyLengths) -> Self {
        Self {
            format_version: PARAMS_FORMAT_VERSION,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            db_name: db_name.into(),
            source_dir: None,
            files: Vec::new(),
            fields: FieldSet::empty(),
            release: None,
            date: None,
            page_size,
            key_lengths,
            indexes: Vec::new(),
        }
    }

    /// Parameters file path for `db_name` inside `dir`
    pub fn path(dir: &Path, db_name: &str) -> PathBuf {
        dir.join(format!("{}.{}", db_name, PARAMS_EXTENSION))
    }

    /// Database name of a parameters file, if `path` names one.
    pub fn db_name_of(path: &Path) -> Option<&str> {
        path.file_name()?
            .to_str()?
            .strip_suffix(PARAMS_EXTENSION)?
            .strip_suffix('.')
            .filter(|name| !name.is_empty())
    }

    pub fn summary(&self, field: FieldKind) -> Option<&FieldSummary> {
        self.indexes.iter().find(|s| s.field == field)
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = Self::path(dir, &self.db_name);
        let temp_path = path.with_extension("json.tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        let json = serde_json::to_string_pretty(self)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        std::fs::rename(&temp_path, &path)?;
        Ok(path)
    }

    pub fn read(dir: &Path, db_name: &str) -> Result<Self> {
        let path = Self::path(dir, db_name);
        if !path.exists() {
            return Err(StorageError::Configuration(format!(
                "no parameters file {} (was the index set closed?)",
                path.display()
            )));
        }

        let reader = BufReader::new(File::open(&path)?);
        let params: BuildParameters = serde_json::from_reader(reader)?;

        if params.format_version > PARAMS_FORMAT_VERSION {
            return Err(StorageError::Configuration(format!(
                "{} uses parameters format {}, this build reads up to {}",
                path.display(),
                params.format_version,
                PARAMS_FORMAT_VERSION
            )));
        }
        Ok(params)
    }
}
