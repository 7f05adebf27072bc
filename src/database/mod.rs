//! Database Module - index sets for one sequence database
//!
//! # Module Structure
//! - `builder`: [`IndexSet`], the build-side contract (configure, insert, close)
//! - `reader`: [`IndexSetReader`], the read-only query handle
//! - `parameters`: the `<db>.params.json` build record
//! - `field_index`: dispatch between identifier and postings indexes

pub mod builder;
pub mod field_index;
pub mod parameters;
pub mod reader;

pub use builder::{FieldReport, IndexSet, IndexSetReport, SetState};
pub use field_index::FieldIndex;
pub use parameters::{BuildParameters, FieldSummary, PARAMS_FORMAT_VERSION};
pub use reader::IndexSetReader;
