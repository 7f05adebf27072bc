//! Index layer implementation
//!
//! Generic disk B+Tree plus its two specializations:
//! - [`IdentifierIndex`]: id / accession / sequence version, one location per entry
//! - [`PostingsIndex`]: keyword / description / taxonomy, runs of locations per term

pub mod btree;
pub mod identifier;
pub mod key;
pub mod page;
pub mod postings;

pub use btree::{BTree, BTreeConfig, BTreeStats, InsertOutcome, TreeState};
pub use identifier::{IdLocation, IdentifierEntry, IdentifierIndex};
pub use key::{fold_query, normalize_key, EntryKey, NormalizedKey};
pub use page::{Absorb, LeafEntry, Node, Page, Payload};
pub use postings::{PostingList, PostingRun, PostingsIndex};
