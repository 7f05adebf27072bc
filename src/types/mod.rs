//! Core value types shared by every index

mod field;
mod location;

pub use field::{FieldKind, FieldSet};
pub use location::{RecordLocation, LOCATION_ENCODED_LEN};

/// Page identifier inside one index file (page 0 holds the header)
pub type PageId = u64;

/// Sentinel for "no page" in sibling links
pub const INVALID_PAGE_ID: PageId = u64::MAX;
