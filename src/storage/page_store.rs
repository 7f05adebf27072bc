//! Page Store: fixed-size block I/O over one index file
//!
//! ## File Layout
//! ```text
//! Page 0:   [magic:4][version:4][page_size:4][high_water:8][blob_len:4][header blob...][crc:4]
//! Page 1..: [page body (page_size - 4)][crc:4]
//! ```
//!
//! The store knows nothing about B+tree nodes: it hands out page ids, moves
//! serialized bytes, and guards every page with a CRC trailer. The header
//! blob in page 0 belongs to the tree and is opaque here.

use super::checksum::{Checksum, ChecksumError, CHECKSUM_LEN};
use crate::config::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::types::PageId;
use crate::{Result, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic number for index files (ASCII "SQIX")
const STORE_MAGIC: u32 = 0x5849_5153;

/// Store format version
const STORE_VERSION: u32 = 1;

/// Fixed prefix of page 0 preceding the header blob
const PREFIX_LEN: usize = 24;

/// Page id of the file header
pub const HEADER_PAGE_ID: PageId = 0;

/// Block I/O over one index file.
pub struct PageStore {
    path: PathBuf,
    file: File,
    page_size: usize,
    /// Next page id to hand out; ids at or above it were never allocated
    next_page_id: PageId,
    read_only: bool,
}

impl PageStore {
    /// Create (or truncate) an index file with the given page size.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(StorageError::Configuration(format!(
                "page size {} outside [{}, {}]",
                page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut store = Self {
            path,
            file,
            page_size,
            next_page_id: HEADER_PAGE_ID + 1,
            read_only: false,
        };
        store.write_header(&[])?;

        debug!(path = %store.path.display(), page_size, "created page store");
        Ok(store)
    }

    /// Open an existing index file for reading only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).open(&path)?;

        let mut prefix = [0u8; PREFIX_LEN];
        if let Err(e) = file.read_exact(&mut prefix) {
            return Err(Self::map_short_read(&path, e, "header prefix"));
        }

        let magic = read_u32(&prefix, 0);
        if magic != STORE_MAGIC {
            return Err(StorageError::Corruption(format!(
                "{}: invalid magic number: expected 0x{:08X}, got 0x{:08X}",
                path.display(),
                STORE_MAGIC,
                magic
            )));
        }

        let version = read_u32(&prefix, 4);
        if version != STORE_VERSION {
            return Err(StorageError::Corruption(format!(
                "{}: unsupported store version {}",
                path.display(),
                version
            )));
        }

        let page_size = read_u32(&prefix, 8) as usize;
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(StorageError::Corruption(format!(
                "{}: implausible page size {}",
                path.display(),
                page_size
            )));
        }
        let next_page_id = read_u64(&prefix, 12);

        let file_len = file.metadata()?.len();
        let expected = next_page_id.saturating_mul(page_size as u64);
        if file_len < expected {
            return Err(StorageError::Truncated {
                path,
                detail: format!(
                    "{} bytes on disk, {} pages of {} bytes expected",
                    file_len, next_page_id, page_size
                ),
            });
        }

        let store = Self {
            path,
            file,
            page_size,
            next_page_id,
            read_only: true,
        };

        // Validates the header page checksum before anyone trusts the blob.
        store.read_raw(HEADER_PAGE_ID)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes a caller may place in one page
    pub fn usable_size(&self) -> usize {
        self.page_size - CHECKSUM_LEN
    }

    /// Largest header blob that fits page 0
    pub fn header_capacity(&self) -> usize {
        self.usable_size() - PREFIX_LEN
    }

    /// Current high-water mark (number of pages including the header)
    pub fn high_water(&self) -> PageId {
        self.next_page_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Reserve a new page id. Nothing is written until [`write_page`](Self::write_page).
    pub fn allocate_page(&mut self) -> Result<PageId> {
        self.ensure_writable()?;
        let id = self.next_page_id;
        self.next_page_id += 1;
        Ok(id)
    }

    /// Read the body of a data page (checksum verified, trailer stripped).
    pub fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        if page_id == HEADER_PAGE_ID {
            return Err(StorageError::Corruption(
                "page 0 is the file header, not a tree page".into(),
            ));
        }
        let mut buf = self.read_raw(page_id)?;
        buf.truncate(self.usable_size());
        Ok(buf)
    }

    /// Write the body of a data page; shorter bodies are zero padded.
    pub fn write_page(&mut self, page_id: PageId, body: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if page_id == HEADER_PAGE_ID {
            return Err(StorageError::Corruption(
                "refusing to overwrite the file header with a tree page".into(),
            ));
        }
        self.check_range(page_id)?;
        self.write_raw(page_id, body)
    }

    /// Read the tree's header blob from page 0.
    pub fn read_header(&self) -> Result<Vec<u8>> {
        let page = self.read_raw(HEADER_PAGE_ID)?;
        let blob_len = read_u32(&page, 20) as usize;
        if blob_len > self.header_capacity() {
            return Err(StorageError::Corruption(format!(
                "{}: header blob length {} exceeds page",
                self.path.display(),
                blob_len
            )));
        }
        Ok(page[PREFIX_LEN..PREFIX_LEN + blob_len].to_vec())
    }

    /// Rewrite page 0 with the current high-water mark and the given blob.
    pub fn write_header(&mut self, blob: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if blob.len() > self.header_capacity() {
            return Err(StorageError::Serialization(format!(
                "header blob of {} bytes does not fit a {} byte page",
                blob.len(),
                self.page_size
            )));
        }

        let mut body = Vec::with_capacity(PREFIX_LEN + blob.len());
        body.extend_from_slice(&STORE_MAGIC.to_le_bytes());
        body.extend_from_slice(&STORE_VERSION.to_le_bytes());
        body.extend_from_slice(&(self.page_size as u32).to_le_bytes());
        body.extend_from_slice(&self.next_page_id.to_le_bytes());
        body.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        body.extend_from_slice(blob);

        self.write_raw(HEADER_PAGE_ID, &body)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn read_raw(&self, page_id: PageId) -> Result<Vec<u8>> {
        self.check_range(page_id)?;

        let mut buf = vec![0u8; self.page_size];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(page_id * self.page_size as u64))?;
        if let Err(e) = file.read_exact(&mut buf) {
            return Err(Self::map_short_read(&self.path, e, &format!("page {}", page_id)));
        }

        Checksum::verify_page(&buf).map_err(|e| match e {
            ChecksumError::Mismatch { .. } => StorageError::Corruption(format!(
                "{}: page {}: {}",
                self.path.display(),
                page_id,
                e
            )),
            other => StorageError::Corruption(other.to_string()),
        })?;

        Ok(buf)
    }

    fn write_raw(&mut self, page_id: PageId, body: &[u8]) -> Result<()> {
        if body.len() > self.usable_size() {
            return Err(StorageError::Serialization(format!(
                "page {} body of {} bytes exceeds usable size {}",
                page_id,
                body.len(),
                self.usable_size()
            )));
        }

        let mut buf = vec![0u8; self.page_size];
        buf[..body.len()].copy_from_slice(body);
        Checksum::seal_page(&mut buf).map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.file.seek(SeekFrom::Start(page_id * self.page_size as u64))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn check_range(&self, page_id: PageId) -> Result<()> {
        if page_id >= self.next_page_id {
            return Err(StorageError::PageOutOfRange {
                page_id,
                high_water: self.next_page_id,
            });
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(StorageError::Usage(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn map_short_read(path: &Path, err: std::io::Error, what: &str) -> StorageError {
        if err.kind() == ErrorKind::UnexpectedEof {
            StorageError::Truncated {
                path: path.to_path_buf(),
                detail: format!("short read of {}", what),
            }
        } else {
            StorageError::Io(err)
        }
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store(page_size: usize) -> (PageStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.xid");
        let store = PageStore::create(path, page_size).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_allocate_write_read() {
        let (mut store, _temp) = create_test_store(1024);

        let a = store.allocate_page().unwrap();
        let b = store.allocate_page().unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.high_water(), 3);

        store.write_page(b, b"second").unwrap();
        store.write_page(a, b"first").unwrap();

        let page = store.read_page(a).unwrap();
        assert_eq!(page.len(), store.usable_size());
        assert_eq!(&page[..5], b"first");
        assert_eq!(&store.read_page(b).unwrap()[..6], b"second");
    }

    #[test]
    fn test_page_out_of_range() {
        let (mut store, _temp) = create_test_store(1024);
        let id = store.allocate_page().unwrap();

        let err = store.read_page(id + 1).unwrap_err();
        assert!(matches!(err, StorageError::PageOutOfRange { page_id: 2, high_water: 2 }));
        assert!(store.write_page(id + 5, b"x").is_err());
        assert!(store.read_page(HEADER_PAGE_ID).is_err());
    }

    #[test]
    fn test_header_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("header.xac");

        {
            let mut store = PageStore::create(&path, 2048).unwrap();
            let id = store.allocate_page().unwrap();
            store.write_page(id, b"leaf").unwrap();
            store.write_header(b"tree-header").unwrap();
            store.sync().unwrap();
        }

        let store = PageStore::open(&path).unwrap();
        assert!(store.is_read_only());
        assert_eq!(store.page_size(), 2048);
        assert_eq!(store.high_water(), 2);
        assert_eq!(store.read_header().unwrap(), b"tree-header");
        assert_eq!(&store.read_page(1).unwrap()[..4], b"leaf");
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.xid");
        PageStore::create(&path, 1024).unwrap();

        let mut store = PageStore::open(&path).unwrap();
        assert!(store.allocate_page().unwrap_err().is_usage());
        assert!(store.write_header(b"").unwrap_err().is_usage());
    }

    #[test]
    fn test_truncated_file_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("short.xkw");

        {
            let mut store = PageStore::create(&path, 1024).unwrap();
            for _ in 0..3 {
                let id = store.allocate_page().unwrap();
                store.write_page(id, b"posting").unwrap();
            }
            store.write_header(b"").unwrap();
        }

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(1024 * 2 + 100).unwrap();

        let err = PageStore::open(&path).err().unwrap();
        assert!(matches!(err, StorageError::Truncated { .. }));
    }

    #[test]
    fn test_corrupt_page_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flip.xde");

        {
            let mut store = PageStore::create(&path, 1024).unwrap();
            let id = store.allocate_page().unwrap();
            store.write_page(id, b"description").unwrap();
            store.write_header(b"").unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[1024 + 2] ^= 0x5A;
        std::fs::write(&path, &bytes).unwrap();

        let store = PageStore::open(&path).unwrap();
        let err = store.read_page(1).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let (mut store, _temp) = create_test_store(512);
        let id = store.allocate_page().unwrap();
        let body = vec![7u8; 512];
        assert!(store.write_page(id, &body).is_err());
    }
}
