//! Page checksums
//!
//! Every page written by the [`PageStore`](super::PageStore) ends with a
//! CRC32 trailer over the rest of the page:
//!
//! ```text
//! [page body: page_size - 4 bytes][crc32: u32 LE]
//! ```
//!
//! A torn write, a truncated copy, or a stray byte flip shows up as a
//! mismatch on the next read instead of as a silently wrong lookup.

use crc32fast::Hasher;

/// Size of the trailer appended to every page
pub const CHECKSUM_LEN: usize = 4;

/// Checksum calculator
pub struct Checksum;

impl Checksum {
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn verify(data: &[u8], expected: u32) -> Result<(), ChecksumError> {
        let actual = Self::compute(data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }
        Ok(())
    }

    /// Write the trailer into the last [`CHECKSUM_LEN`] bytes of `page`.
    pub fn seal_page(page: &mut [u8]) -> Result<(), ChecksumError> {
        let body_len = Self::body_len(page.len())?;
        let crc = Self::compute(&page[..body_len]);
        page[body_len..].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Check the trailer of a full page read back from disk.
    pub fn verify_page(page: &[u8]) -> Result<(), ChecksumError> {
        let body_len = Self::body_len(page.len())?;
        let mut stored = [0u8; CHECKSUM_LEN];
        stored.copy_from_slice(&page[body_len..]);
        Self::verify(&page[..body_len], u32::from_le_bytes(stored))
    }

    fn body_len(page_len: usize) -> Result<usize, ChecksumError> {
        page_len
            .checked_sub(CHECKSUM_LEN)
            .ok_or_else(|| ChecksumError::InvalidFormat(format!("page of {} bytes has no room for a checksum", page_len)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch {
        expected: u32,
        actual: u32,
        data_len: usize,
    },

    #[error("Invalid checksum format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_basic() {
        let data = b"ID   HBB_HUMAN";
        let checksum = Checksum::compute(data);

        assert!(Checksum::verify(data, checksum).is_ok());
        assert!(Checksum::verify(data, checksum + 1).is_err());
        assert!(Checksum::verify(b"ID   HBA_HUMAN", checksum).is_err());
    }

    #[test]
    fn test_seal_and_verify_page() {
        let mut page = vec![0u8; 512];
        page[..6].copy_from_slice(b"globin");
        Checksum::seal_page(&mut page).unwrap();
        Checksum::verify_page(&page).unwrap();

        page[3] ^= 0xFF;
        let err = Checksum::verify_page(&page).unwrap_err();
        assert!(matches!(err, ChecksumError::Mismatch { data_len: 508, .. }));
    }

    #[test]
    fn test_page_too_small() {
        let mut tiny = [0u8; 3];
        assert!(matches!(
            Checksum::seal_page(&mut tiny),
            Err(ChecksumError::InvalidFormat(_))
        ));
    }
}
