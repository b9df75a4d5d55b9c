//! Retrieval document produced from exactly one record.

use sha2::{Digest, Sha256};

/// A self-contained retrieval document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Manifest key; equal to the source record id
    pub key: String,
    /// Human-readable file name, unique across the corpus
    pub name: String,
    pub content: String,
    pub mime_type: &'static str,
}

impl Document {
    /// Hex SHA-256 of the content.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.content.as_bytes()))
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}
