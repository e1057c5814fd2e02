use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VeilError;

/// Algorithms offered by the transform engine.
///
/// The serialized form is the wire tag (`AES-256`, `RSA`, `SHA-256`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256-GCM, keyed by a raw 256-bit secret or a passphrase
    #[serde(rename = "AES-256")]
    Aes256,
    /// RSA-2048 OAEP wrapping a one-time AES-256-GCM key
    #[serde(rename = "RSA")]
    Rsa,
    /// SHA-256 digest (no key, not reversible)
    #[serde(rename = "SHA-256")]
    Sha256,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Aes256, Algorithm::Rsa, Algorithm::Sha256];

    /// Canonical wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256 => "AES-256",
            Algorithm::Rsa => "RSA",
            Algorithm::Sha256 => "SHA-256",
        }
    }

    /// Whether the algorithm encrypts (and therefore takes a key).
    pub fn is_cipher(&self) -> bool {
        !matches!(self, Algorithm::Sha256)
    }

    /// Single-byte identifier used in the binary file container.
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::Aes256 => 1,
            Algorithm::Rsa => 2,
            Algorithm::Sha256 => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Algorithm::ALL.into_iter().find(|a| a.id() == id)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = VeilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256" | "aes256" | "aes-256-gcm" | "symmetric" => Ok(Algorithm::Aes256),
            "rsa" | "asymmetric" => Ok(Algorithm::Rsa),
            "sha-256" | "sha256" | "hash" => Ok(Algorithm::Sha256),
            _ => Err(VeilError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}
