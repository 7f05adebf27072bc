//! Page Cache: bounded LRU of decoded pages over one [`PageStore`]
//!
//! Ownership rule: the cache exclusively owns decoded [`Page`]s; the store
//! owns only serialized bytes. Callers borrow pages for the duration of one
//! call and address them by [`PageId`] otherwise, so an eviction can never
//! pull a page out from under a live reference.
//!
//! ```text
//! get(id) ──hit──> &Page
//!    │miss
//!    └──> PageStore::read_page ──decode──> insert (evict LRU, write back if dirty)
//! ```

use crate::index::page::{Page, Payload};
use crate::storage::PageStore;
use crate::types::PageId;
use crate::{Result, StorageError};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::trace;

struct CachedPage<P> {
    page: Page<P>,
    dirty: bool,
}

/// Cache statistics
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Dirty pages written because they were evicted
    pub write_backs: u64,
    /// Dirty pages written by `flush_all`
    pub flushed: u64,
    pub capacity: usize,
    pub resident: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct PageCache<P: Payload> {
    store: PageStore,
    pages: LruCache<PageId, CachedPage<P>>,
    stats: CacheStats,
}

impl<P: Payload> PageCache<P> {
    pub fn new(store: PageStore, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            pages: LruCache::new(cap),
            stats: CacheStats {
                capacity: cap.get(),
                ..Default::default()
            },
        }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PageStore {
        &mut self.store
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.pages.len(),
            ..self.stats.clone()
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.pages.iter().filter(|(_, c)| c.dirty).count()
    }

    /// Reserve a page id in the backing store.
    pub fn allocate(&mut self) -> Result<PageId> {
        self.store.allocate_page()
    }

    /// Take ownership of a freshly built page; it starts out dirty.
    pub fn insert_new(&mut self, page: Page<P>) -> Result<()> {
        self.ensure_writable()?;
        let id = page.id;
        self.make_room()?;
        self.pages.put(id, CachedPage { page, dirty: true });
        Ok(())
    }

    pub fn get(&mut self, page_id: PageId) -> Result<&Page<P>> {
        self.ensure_resident(page_id)?;
        self.pages
            .get(&page_id)
            .map(|cached| &cached.page)
            .ok_or_else(|| StorageError::Corruption(format!("page {} vanished from cache", page_id)))
    }

    /// Borrow a page for mutation; it is marked dirty.
    pub fn get_mut(&mut self, page_id: PageId) -> Result<&mut Page<P>> {
        self.ensure_writable()?;
        self.ensure_resident(page_id)?;
        let cached = self
            .pages
            .get_mut(&page_id)
            .ok_or_else(|| StorageError::Corruption(format!("page {} vanished from cache", page_id)))?;
        cached.dirty = true;
        Ok(&mut cached.page)
    }

    /// Flag a resident page for write-back.
    pub fn mark_dirty(&mut self, page_id: PageId) -> Result<()> {
        self.ensure_writable()?;
        match self.pages.peek_mut(&page_id) {
            Some(cached) => {
                cached.dirty = true;
                Ok(())
            }
            None => Err(StorageError::Usage(format!(
                "page {} is not resident and cannot be marked dirty",
                page_id
            ))),
        }
    }

    /// Write every dirty page to the store. Returns the number written;
    /// a second call with no mutation in between writes nothing.
    pub fn flush_all(&mut self) -> Result<usize> {
        let mut written = 0;
        for (id, cached) in self.pages.iter_mut() {
            if !cached.dirty {
                continue;
            }
            self.store.write_page(*id, &cached.page.serialize())?;
            cached.dirty = false;
            written += 1;
        }
        self.stats.flushed += written as u64;
        Ok(written)
    }

    fn ensure_resident(&mut self, page_id: PageId) -> Result<()> {
        if self.pages.contains(&page_id) {
            self.stats.hits += 1;
            return Ok(());
        }

        self.stats.misses += 1;
        let bytes = self.store.read_page(page_id)?;
        let page = Page::deserialize(page_id, &bytes)?;

        self.make_room()?;
        self.pages.put(page_id, CachedPage { page, dirty: false });
        Ok(())
    }

    /// Evict least-recently-used pages until one slot is free.
    fn make_room(&mut self) -> Result<()> {
        while self.pages.len() >= self.pages.cap().get() {
            let Some((victim_id, victim)) = self.pages.pop_lru() else {
                break;
            };
            self.stats.evictions += 1;
            if victim.dirty {
                self.store.write_page(victim_id, &victim.page.serialize())?;
                self.stats.write_backs += 1;
                trace!(page = victim_id, "wrote back evicted page");
            }
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.store.is_read_only() {
            return Err(StorageError::Usage(format!(
                "{} is open read-only",
                self.store.path().display()
            )));
        }
        Ok(())
    }
}
