//! Storage layer
//!
//! Fixed-size page I/O over one file per index, with per-page checksums.

pub mod checksum;
pub mod page_store;

pub use checksum::{Checksum, ChecksumError, CHECKSUM_LEN};
pub use page_store::{PageStore, HEADER_PAGE_ID};
