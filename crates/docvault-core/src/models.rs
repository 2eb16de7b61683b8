//! Core data types for docvault.
//!
//! A document is identified by the SHA-256 of its bytes, never by its path.
//! [`DocumentRecord`] is the metadata row keyed by that fingerprint; the
//! path it carries is simply the latest place the content was observed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Length of a [`Fingerprint`] in bytes (SHA-256).
pub const FINGERPRINT_LEN: usize = 32;

/// Content fingerprint: the SHA-256 digest of a file's complete bytes.
///
/// Displays and serializes as 64 lowercase hex characters. Ordering is
/// byte-wise, which keeps plans and listings deterministic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `n` hex characters, for human-facing output.
    pub fn short(&self, n: usize) -> String {
        let mut s = self.to_hex();
        s.truncate(n.min(FINGERPRINT_LEN * 2));
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short(12))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FingerprintParseError {
    #[error("fingerprint must be {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("fingerprint is not valid hex: {0}")]
    Hex(String),
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != FINGERPRINT_LEN * 2 {
            return Err(FingerprintParseError::Length {
                expected: FINGERPRINT_LEN * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| FingerprintParseError::Hex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Text extraction progress for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionState {
    /// Not yet extracted, or the last attempt failed transiently.
    Pending,
    /// Text is stored alongside the record.
    Extracted,
    /// Permanent failure; not retried until the content (fingerprint) changes.
    Failed,
}

impl ExtractionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionState::Pending => "pending",
            ExtractionState::Extracted => "extracted",
            ExtractionState::Failed => "failed",
        }
    }
}

impl FromStr for ExtractionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(ExtractionState::Pending),
            "extracted" => Ok(ExtractionState::Extracted),
            "failed" => Ok(ExtractionState::Failed),
            other => anyhow::bail!("unknown extraction state: '{}'", other),
        }
    }
}

/// Vector-index linkage for a record.
///
/// `Indexed` holds only while the index has a queryable entry for the
/// fingerprint. `Stale` marks an index call in flight or failed: the entry
/// may or may not exist and the next sync resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexedState {
    Unindexed,
    Indexed,
    Stale,
}

impl IndexedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexedState::Unindexed => "unindexed",
            IndexedState::Indexed => "indexed",
            IndexedState::Stale => "stale",
        }
    }
}

impl FromStr for IndexedState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "unindexed" => Ok(IndexedState::Unindexed),
            "indexed" => Ok(IndexedState::Indexed),
            "stale" => Ok(IndexedState::Stale),
            other => anyhow::bail!("unknown indexed state: '{}'", other),
        }
    }
}

/// Metadata row for one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub fingerprint: Fingerprint,
    /// Canonical location: the most recent observation of this content.
    pub current_path: String,
    /// First path this content was ever observed at.
    pub original_path: String,
    /// Other paths currently holding byte-identical content, sorted.
    pub aliases: Vec<String>,
    /// Lower-cased extension of the canonical path, without the dot.
    pub file_type: String,
    pub size: u64,
    /// Modification time (Unix seconds) at the last observation.
    pub last_seen_mtime: i64,
    pub extraction_state: ExtractionState,
    pub indexed_state: IndexedState,
    /// Consecutive syncs in which the content was not observed. 0 = present.
    pub missing_syncs: u32,
    /// Deletion started but the index has not confirmed removal yet.
    pub pending_delete: bool,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub last_error: Option<String>,
}

impl DocumentRecord {
    /// A fresh record for content seen for the first time.
    pub fn new(file: &ObservedFile, aliases: Vec<String>, now: i64) -> Self {
        Self {
            fingerprint: file.fingerprint,
            current_path: file.path.clone(),
            original_path: file.path.clone(),
            aliases,
            file_type: file_type_of(&file.path),
            size: file.size,
            last_seen_mtime: file.mtime,
            extraction_state: ExtractionState::Pending,
            indexed_state: IndexedState::Unindexed,
            missing_syncs: 0,
            pending_delete: false,
            first_seen_at: now,
            last_seen_at: now,
            last_error: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.missing_syncs > 0
    }

    /// Eligible to appear in search results.
    pub fn is_searchable(&self) -> bool {
        !self.pending_delete && !self.is_missing()
    }

    /// Extraction or indexing still owes work for this content.
    pub fn needs_processing(&self) -> bool {
        if self.pending_delete {
            return false;
        }
        match self.extraction_state {
            ExtractionState::Pending => true,
            ExtractionState::Extracted => self.indexed_state != IndexedState::Indexed,
            ExtractionState::Failed => false,
        }
    }

    /// Canonical path followed by aliases.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.current_path.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// One file seen on disk during a scan, already fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedFile {
    pub path: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub mtime: i64,
}

/// Lower-cased extension of `path` without the leading dot, or `""`.
pub fn file_type_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_hex_roundtrip() {
        let fp = Fingerprint::from_bytes([0xab; FINGERPRINT_LEN]);
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(fp.short(8), "abababab");
    }

    #[test]
    fn fingerprint_rejects_bad_input() {
        assert!(matches!(
            "abc".parse::<Fingerprint>(),
            Err(FingerprintParseError::Length { .. })
        ));
        let not_hex = "z".repeat(64);
        assert!(matches!(
            not_hex.parse::<Fingerprint>(),
            Err(FingerprintParseError::Hex(_))
        ));
    }

    #[test]
    fn states_parse_their_own_labels() {
        for s in [
            ExtractionState::Pending,
            ExtractionState::Extracted,
            ExtractionState::Failed,
        ] {
            assert_eq!(s.as_str().parse::<ExtractionState>().unwrap(), s);
        }
        for s in [
            IndexedState::Unindexed,
            IndexedState::Indexed,
            IndexedState::Stale,
        ] {
            assert_eq!(s.as_str().parse::<IndexedState>().unwrap(), s);
        }
    }

    #[test]
    fn failed_extraction_is_not_reprocessed() {
        let file = ObservedFile {
            path: "/docs/a.pdf".into(),
            fingerprint: Fingerprint::from_bytes([1; FINGERPRINT_LEN]),
            size: 10,
            mtime: 0,
        };
        let mut rec = DocumentRecord::new(&file, vec![], 0);
        assert!(rec.needs_processing());
        assert_eq!(rec.file_type, "pdf");

        rec.extraction_state = ExtractionState::Failed;
        assert!(!rec.needs_processing());

        rec.extraction_state = ExtractionState::Extracted;
        rec.indexed_state = IndexedState::Stale;
        assert!(rec.needs_processing());
        rec.indexed_state = IndexedState::Indexed;
        assert!(!rec.needs_processing());
    }
}
