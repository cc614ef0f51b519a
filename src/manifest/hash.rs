//! Stable manifest hashing for drift detection.
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use super::Manifest;

/// SHA-256 of the authored manifest bytes with CRLF and lone CR normalized
/// to LF, as lowercase hex.
///
/// # Examples
///
/// ```
/// use converge_cli::manifest::hash::manifest_hash;
///
/// assert_eq!(manifest_hash(b"{}\r\n"), manifest_hash(b"{}\n"));
/// ```
#[must_use]
pub fn manifest_hash(bytes: &[u8]) -> String {
    let mut normalized = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' {
            if iter.peek() == Some(&&b'\n') {
                iter.next();
            }
            normalized.push(b'\n');
        } else {
            normalized.push(b);
        }
    }
    hex_digest(&normalized)
}

/// [`manifest_hash`] over a root document and every file it includes, in
/// load order.
///
/// Documents are joined with a NUL byte, so a lone document hashes exactly
/// as [`manifest_hash`] does and an edit to any include changes the result.
#[must_use]
pub fn document_set_hash<'a>(documents: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut joined = Vec::new();
    for (i, doc) in documents.into_iter().enumerate() {
        if i > 0 {
            joined.push(0);
        }
        joined.extend_from_slice(doc);
    }
    manifest_hash(&joined)
}

/// SHA-256 of the canonical JSON form of an expanded manifest.
///
/// Object keys are emitted in sorted order, so the hash only depends on
/// content.
#[must_use]
pub fn expanded_hash(manifest: &Manifest) -> String {
    let canonical = serde_json::to_value(manifest)
        .map(|v| v.to_string())
        .unwrap_or_default();
    hex_digest(canonical.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for b in &result {
        // write! to a String is infallible; unwrap_or(()) makes that explicit.
        write!(hex, "{b:02x}").unwrap_or(());
    }
    hex
}
