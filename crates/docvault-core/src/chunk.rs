//! Paragraph-boundary text chunker used by the SQLite vector index.
//!
//! Extracted text is split on blank lines (`\n\n`) and paragraphs are
//! packed greedily into chunks of at most `max_tokens × 4` bytes.
//! A paragraph that is too large on its own is hard-split at the last
//! newline or space before the limit.
//!
//! Chunk ids are `<fingerprint hex>:<index>`, so re-chunking the same
//! content always yields the same ids and an upsert can replace a
//! document's chunks wholesale.
//!
//! ```rust
//! use docvault_core::chunk::chunk_text;
//! use docvault_core::fingerprint::fingerprint_bytes;
//!
//! let fp = fingerprint_bytes(b"doc");
//! let chunks = chunk_text(&fp, "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].id.ends_with(":0"));
//! ```

use sha2::{Digest, Sha256};

use crate::models::Fingerprint;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub fingerprint: Fingerprint,
    pub index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex. Lets the embedder skip unchanged chunks.
    pub hash: String,
}

/// Split `text` into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk, even for empty text.
pub fn chunk_text(fingerprint: &Fingerprint, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }
        if para.len() > max_chars {
            hard_split(para, max_chars, &mut pieces);
            continue;
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, t)| make_chunk(fingerprint, i, t))
        .collect()
}

/// Cut an oversized paragraph into pieces of at most `max_chars` bytes,
/// preferring to break after a newline or space.
fn hard_split(mut remaining: &str, max_chars: usize, out: &mut Vec<String>) {
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, max_chars);
        let cut = if limit >= remaining.len() {
            remaining.len()
        } else {
            remaining[..limit]
                .rfind(['\n', ' '])
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        };
        // A single char wider than max_chars still has to make progress.
        let cut = if cut == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            cut
        };
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[cut..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(fingerprint: &Fingerprint, index: usize, text: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Chunk {
        id: format!("{}:{}", fingerprint.to_hex(), index),
        fingerprint: *fingerprint,
        index,
        text,
        hash,
    }
}
