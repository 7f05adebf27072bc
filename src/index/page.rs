//! Decoded B+tree pages and their on-disk encoding
//!
//! ## Page Layout
//! ```text
//! [Header: 11 bytes]
//!   - kind: 1 byte (1 = leaf, 2 = internal)
//!   - count: 2 bytes (u16, entries or separators)
//!   - next_leaf: 8 bytes (u64, leaves only)
//!
//! Leaf:     entry[0..count] = [key_len:u16][key][seq:u32][payload]
//! Internal: [child0:u64] then count x [key_len:u16][key][seq:u32][child:u64]
//! ```
//!
//! Separator semantics: every key in `children[i]` is `< separators[i]`, and
//! every key in `children[i + 1]` is `>= separators[i]`.

use super::key::EntryKey;
use crate::types::{PageId, INVALID_PAGE_ID};
use crate::{Result, StorageError};
use std::fmt::Debug;

/// Node header size
pub const NODE_HEADER_LEN: usize = 11;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

/// What a leaf stores for each key. Implemented by the identifier and
/// postings specializations.
pub trait Payload: Clone + Debug + Sized {
    fn encoded_len(&self) -> usize;

    fn encode_into(&self, buf: &mut Vec<u8>);

    /// Decode from the front of `buf`, returning the payload and bytes consumed.
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// Number of record locations carried
    fn record_count(&self) -> u64;

    /// Offer `incoming`, inserted under the same key, to the last entry already
    /// stored for that key. `room` is how many bytes the entry may still grow.
    fn absorb(&mut self, incoming: Self, room: usize) -> Absorb<Self>;
}

/// Result of [`Payload::absorb`].
#[derive(Debug)]
pub enum Absorb<P> {
    /// Merged in place; no new entry needed
    Merged,
    /// Refused; store it as a new entry with the next `seq`
    Rejected(P),
}

#[derive(Debug, Clone)]
pub struct LeafEntry<P> {
    pub key: EntryKey,
    pub payload: P,
}

impl<P: Payload> LeafEntry<P> {
    pub fn encoded_len(&self) -> usize {
        self.key.encoded_len() + self.payload.encoded_len()
    }
}

#[derive(Debug, Clone)]
pub enum Node<P> {
    Leaf {
        entries: Vec<LeafEntry<P>>,
        next_leaf: PageId,
    },
    Internal {
        separators: Vec<EntryKey>,
        children: Vec<PageId>,
    },
}

/// A decoded page. Owned exclusively by the page cache while resident.
#[derive(Debug, Clone)]
pub struct Page<P> {
    pub id: PageId,
    pub node: Node<P>,
}

impl<P: Payload> Page<P> {
    pub fn new_leaf(id: PageId) -> Self {
        Self {
            id,
            node: Node::Leaf {
                entries: Vec::new(),
                next_leaf: INVALID_PAGE_ID,
            },
        }
    }

    /// New root above a split: `left < separator <= right`
    pub fn new_root(id: PageId, separator: EntryKey, left: PageId, right: PageId) -> Self {
        Self {
            id,
            node: Node::Internal {
                separators: vec![separator],
                children: vec![left, right],
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Leaf { .. })
    }

    /// Entries in a leaf, separators in an internal node
    pub fn len(&self) -> usize {
        match &self.node {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Internal { separators, .. } => separators.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encoded_len(&self) -> usize {
        NODE_HEADER_LEN
            + match &self.node {
                Node::Leaf { entries, .. } => entries.iter().map(|e| e.encoded_len()).sum::<usize>(),
                Node::Internal { separators, .. } => {
                    8 + separators.iter().map(|s| s.encoded_len() + 8).sum::<usize>()
                }
            }
    }

    /// Child to descend into for `target`
    pub fn child_for(&self, target: &EntryKey) -> Result<PageId> {
        match &self.node {
            Node::Internal { separators, children } => {
                let idx = separators.partition_point(|s| s <= target);
                children.get(idx).copied().ok_or_else(|| {
                    StorageError::Corruption(format!("page {} missing child {}", self.id, idx))
                })
            }
            Node::Leaf { .. } => Err(StorageError::Corruption(format!(
                "page {} is a leaf, expected an internal node",
                self.id
            ))),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match &self.node {
            Node::Leaf { entries, next_leaf } => {
                buf.push(KIND_LEAF);
                buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
                buf.extend_from_slice(&next_leaf.to_le_bytes());
                for entry in entries {
                    entry.key.encode_into(&mut buf);
                    entry.payload.encode_into(&mut buf);
                }
            }
            Node::Internal { separators, children } => {
                buf.push(KIND_INTERNAL);
                buf.extend_from_slice(&(separators.len() as u16).to_le_bytes());
                buf.extend_from_slice(&INVALID_PAGE_ID.to_le_bytes());
                buf.extend_from_slice(&children[0].to_le_bytes());
                for (sep, child) in separators.iter().zip(children.iter().skip(1)) {
                    sep.encode_into(&mut buf);
                    buf.extend_from_slice(&child.to_le_bytes());
                }
            }
        }
        buf
    }

    pub fn deserialize(id: PageId, buf: &[u8]) -> Result<Self> {
        if buf.len() < NODE_HEADER_LEN {
            return Err(StorageError::Corruption(format!(
                "page {} too small: {} bytes",
                id,
                buf.len()
            )));
        }

        let kind = buf[0];
        let count = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        let next_leaf = read_page_id(buf, 3)?;
        let mut offset = NODE_HEADER_LEN;

        let node = match kind {
            KIND_LEAF => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let (key, used) = EntryKey::decode(&buf[offset..])?;
                    offset += used;
                    let (payload, used) = P::decode(&buf[offset..])?;
                    offset += used;
                    entries.push(LeafEntry { key, payload });
                }
                Node::Leaf { entries, next_leaf }
            }
            KIND_INTERNAL => {
                let mut separators = Vec::with_capacity(count);
                let mut children = Vec::with_capacity(count + 1);
                children.push(read_page_id(buf, offset)?);
                offset += 8;
                for _ in 0..count {
                    let (sep, used) = EntryKey::decode(&buf[offset..])?;
                    offset += used;
                    separators.push(sep);
                    children.push(read_page_id(buf, offset)?);
                    offset += 8;
                }
                Node::Internal { separators, children }
            }
            other => {
                return Err(StorageError::Corruption(format!(
                    "page {} has unknown node kind {}",
                    id, other
                )))
            }
        };

        let page = Self { id, node };
        page.validate()?;
        Ok(page)
    }

    /// Check in-page invariants: strictly ordered keys, child count.
    pub fn validate(&self) -> Result<()> {
        match &self.node {
            Node::Leaf { entries, .. } => {
                if entries.windows(2).any(|w| w[0].key >= w[1].key) {
                    return Err(StorageError::Corruption(format!(
                        "leaf page {} keys out of order",
                        self.id
                    )));
                }
            }
            Node::Internal { separators, children } => {
                if separators.is_empty() {
                    return Err(StorageError::Corruption(format!(
                        "internal page {} has no separators",
                        self.id
                    )));
                }
                if children.len() != separators.len() + 1 {
                    return Err(StorageError::Corruption(format!(
                        "internal page {} has {} separators but {} children",
                        self.id,
                        separators.len(),
                        children.len()
                    )));
                }
                if separators.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(StorageError::Corruption(format!(
                        "internal page {} separators out of order",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn read_page_id(buf: &[u8], at: usize) -> Result<PageId> {
    let bytes = buf.get(at..at + 8).ok_or_else(|| {
        StorageError::Corruption(format!("page id at offset {} overruns page", at))
    })?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::identifier::IdLocation;
    use crate::types::RecordLocation;

    fn entry(key: &str, seq: u32, file: u32, offset: u64) -> LeafEntry<IdLocation> {
        LeafEntry {
            key: EntryKey::new(key.as_bytes().to_vec(), seq),
            payload: IdLocation(RecordLocation::new(file, offset)),
        }
    }

    #[test]
    fn test_leaf_encoding() {
        let page = Page {
            id: 7,
            node: Node::Leaf {
                entries: vec![entry("alpha", 0, 0, 100), entry("alpha", 1, 2, 5), entry("beta", 0, 0, 250)],
                next_leaf: 9,
            },
        };

        let bytes = page.serialize();
        assert_eq!(bytes.len(), page.encoded_len());

        let decoded = Page::<IdLocation>::deserialize(7, &bytes).unwrap();
        match decoded.node {
            Node::Leaf { entries, next_leaf } => {
                assert_eq!(next_leaf, 9);
                assert_eq!(entries.len(), 3);
                assert_eq!(entries[1].key, EntryKey::new(b"alpha".to_vec(), 1));
                assert_eq!(entries[1].payload.0, RecordLocation::new(2, 5));
            }
            Node::Internal { .. } => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_internal_routing() {
        let root = Page::<IdLocation>::new_root(3, EntryKey::new(b"gamma".to_vec(), 0), 1, 2);
        assert_eq!(root.child_for(&EntryKey::first(b"beta")).unwrap(), 1);
        assert_eq!(root.child_for(&EntryKey::first(b"gamma")).unwrap(), 2);
        assert_eq!(root.child_for(&EntryKey::first(b"omega")).unwrap(), 2);

        let bytes = root.serialize();
        assert_eq!(bytes.len(), root.encoded_len());
        let decoded = Page::<IdLocation>::deserialize(3, &bytes).unwrap();
        assert!(!decoded.is_leaf());
        assert_eq!(decoded.child_for(&EntryKey::last(b"delta")).unwrap(), 1);
    }

    #[test]
    fn test_rejects_unordered_leaf() {
        let page = Page {
            id: 4,
            node: Node::Leaf {
                entries: vec![entry("beta", 0, 0, 1), entry("alpha", 0, 0, 2)],
                next_leaf: INVALID_PAGE_ID,
            },
        };
        let bytes = page.serialize();
        assert!(Page::<IdLocation>::deserialize(4, &bytes).is_err());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let mut bytes = Page::<IdLocation>::new_leaf(1).serialize();
        bytes[0] = 9;
        assert!(Page::<IdLocation>::deserialize(1, &bytes).is_err());
    }
}
