//! seqindex Storage Engine
//!
//! Disk-resident secondary indexes for flat-file biological sequence
//! databases (EMBL, GenBank, SwissProt, FASTA flavours).
//!
//! ## Core Features
//! - Lookup by identifier, accession, sequence version, keyword, description
//!   word and taxonomy term without scanning the database files
//! - Duplicate-tolerant B+Tree: repeated identifiers stay individually
//!   retrievable, popular terms accumulate runs of locations
//! - Bounded memory: every index reads and writes through an LRU page cache
//!
//! ## Architecture
//! - Storage layer: fixed-size pages with CRC trailers (`storage`)
//! - Cache layer: LRU of decoded pages with dirty write-back (`cache`)
//! - Index layer: generic B+Tree, identifier and postings specializations (`index`)
//! - Database layer: per-database index sets, build and query handles (`database`)
//!
//! ## Example
//! ```ignore
//! use seqindex::{FieldKind, IndexConfig, IndexSet, IndexSetReader, RecordLocation};
//!
//! let mut set = IndexSet::new("/idx/swiss", "swiss", IndexConfig::default());
//! set.set_fields("id,acc,key".parse()?)?;
//! set.open_caches()?;
//! set.insert_record(RecordLocation::new(0, 0), &[(FieldKind::Id, "HBB_HUMAN"), (FieldKind::Accession, "P68871")])?;
//! set.close_caches()?;
//!
//! let reader = IndexSetReader::open("/idx/swiss")?;
//! let hits = reader.lookup(FieldKind::Accession, "p68871")?;
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod index;
pub mod storage;
pub mod types;

mod error;

pub use config::{IndexConfig, KeyLengths};
pub use database::{BuildParameters, IndexSet, IndexSetReader, IndexSetReport};
pub use error::{Result, StorageError};
pub use index::{IdentifierEntry, IdentifierIndex, PostingsIndex};
pub use types::{FieldKind, FieldSet, RecordLocation};
