//! Caching layer
//!
//! Bounded LRU buffer of decoded index pages.

pub mod page_cache;

pub use page_cache::{CacheStats, PageCache};
