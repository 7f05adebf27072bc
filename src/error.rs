//! Error types for the seqindex engine
//!
//! Fatal conditions (configuration, I/O, corruption, misuse) surface as
//! [`StorageError`]. Data problems in a single record (over-long key, empty
//! key, repeated identifier) are recovered where they happen and only logged.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Truncated index file {path}: {detail}")]
    Truncated { path: PathBuf, detail: String },

    #[error("Page {page_id} out of range (high-water mark {high_water})")]
    PageOutOfRange { page_id: u64, high_water: u64 },

    /// A fatal error raised while indexing one record, tagged with the
    /// database file and byte offset so the operator can fix the source.
    #[error("failed to index record at {file}:{offset}: {source}")]
    AtRecord {
        file: String,
        offset: u64,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// True for errors caused by calling the engine in the wrong state.
    pub fn is_usage(&self) -> bool {
        match self {
            StorageError::Usage(_) => true,
            StorageError::AtRecord { source, .. } => source.is_usage(),
            _ => false,
        }
    }

    /// True for errors caused by a bad field list or source directory.
    pub fn is_configuration(&self) -> bool {
        match self {
            StorageError::Configuration(_) => true,
            StorageError::AtRecord { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
