//! SHA-256 digests of byte slices and streamed content

use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest (32 bytes), displayed as 64 lowercase hex chars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DigestResult([u8; 32]);

impl DigestResult {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DigestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash a byte slice in memory. The empty slice is valid input.
pub fn digest(data: &[u8]) -> DigestResult {
    DigestResult(Sha256::digest(data).into())
}

/// Incremental digest for content fed in chunks.
#[derive(Default, Clone)]
pub struct DigestAccumulator {
    hasher: Sha256,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finalize(self) -> DigestResult {
        DigestResult(self.hasher.finalize().into())
    }
}
