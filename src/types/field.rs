//! Indexed field kinds and the per-database field selection

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which record field an index covers.
///
/// The first three are identifier-like (one location per entry, duplicates
/// kept apart); the rest are postings (many locations per key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKind {
    Id,
    Accession,
    SeqVersion,
    Keyword,
    Description,
    Taxonomy,
}

impl FieldKind {
    pub const ALL: [FieldKind; 6] = [
        FieldKind::Id,
        FieldKind::Accession,
        FieldKind::SeqVersion,
        FieldKind::Keyword,
        FieldKind::Description,
        FieldKind::Taxonomy,
    ];

    pub fn is_identifier(&self) -> bool {
        matches!(self, FieldKind::Id | FieldKind::Accession | FieldKind::SeqVersion)
    }

    /// Short name used in parameter files and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Id => "id",
            FieldKind::Accession => "acc",
            FieldKind::SeqVersion => "sv",
            FieldKind::Keyword => "key",
            FieldKind::Description => "des",
            FieldKind::Taxonomy => "tax",
        }
    }

    /// Index file extension, e.g. `embl.xac` for accessions
    pub fn extension(&self) -> &'static str {
        match self {
            FieldKind::Id => "xid",
            FieldKind::Accession => "xac",
            FieldKind::SeqVersion => "xsv",
            FieldKind::Keyword => "xkw",
            FieldKind::Description => "xde",
            FieldKind::Taxonomy => "xtx",
        }
    }

    pub fn file_name(&self, db_name: &str) -> String {
        format!("{}.{}", db_name, self.extension())
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| StorageError::Corruption(format!("Unknown field kind tag {}", value)))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(FieldKind::Id),
            "acc" | "accession" => Ok(FieldKind::Accession),
            "sv" | "seqversion" | "version" => Ok(FieldKind::SeqVersion),
            "key" | "kw" | "keyword" => Ok(FieldKind::Keyword),
            "des" | "description" => Ok(FieldKind::Description),
            "tax" | "org" | "taxonomy" => Ok(FieldKind::Taxonomy),
            other => Err(StorageError::Configuration(format!("Unknown field '{}'", other))),
        }
    }
}

/// Set of fields requested for one database build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet(u8);

impl FieldSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        FieldKind::ALL.iter().copied().collect()
    }

    pub fn with(mut self, field: FieldKind) -> Self {
        self.insert(field);
        self
    }

    pub fn insert(&mut self, field: FieldKind) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: FieldKind) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = FieldKind> + '_ {
        FieldKind::ALL.iter().copied().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<FieldKind> for FieldSet {
    fn from_iter<I: IntoIterator<Item = FieldKind>>(iter: I) -> Self {
        let mut set = FieldSet::empty();
        for field in iter {
            set.insert(field);
        }
        set
    }
}

impl FromStr for FieldSet {
    type Err = StorageError;

    /// Parses a comma separated list such as `id,acc,sv,des`.
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(FieldKind::from_str)
            .collect()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|k| k.name()).collect();
        f.write_str(&names.join(","))
    }
}
