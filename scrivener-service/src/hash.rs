//! Content hashing for uploads.

use sha2::{Digest, Sha256};

/// SHA-256 of the uploaded bytes as a hex string.
///
/// Stored with the document so identical uploads are recognizable.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
