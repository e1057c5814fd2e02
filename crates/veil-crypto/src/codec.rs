//! Text codec and the self-describing cipher payload token
//!
//! Token format (seven `.`-separated segments):
//! ```text
//! v1 . <ALG> . <kdf> . <wrapped key> . <nonce> . <tag> . <ciphertext>
//! ```
//! Binary segments are unpadded URL-safe base64; an empty segment means
//! "absent". `<ALG>` is the wire tag (`AES-256` or `RSA`). `<kdf>` is the
//! encoded [`KeyDerivation`] of passphrase-keyed AES payloads, `<wrapped key>`
//! the RSA-OAEP encrypted one-time key of RSA payloads.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::fmt;
use std::str::FromStr;
use veil_core::{Algorithm, VeilError, VeilResult};

use crate::kdf::KeyDerivation;
use crate::{NONCE_SIZE, TAG_SIZE};

pub const TOKEN_VERSION: &str = "v1";

const SEGMENTS: usize = 7;

/// Everything needed to decrypt, bundled with the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherPayload {
    pub algorithm: Algorithm,
    /// Present when the AES key was derived from a passphrase
    pub kdf: Option<KeyDerivation>,
    /// Present for RSA payloads: the one-time AES key under RSA-OAEP
    pub wrapped_key: Option<Vec<u8>>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl CipherPayload {
    /// Associated data bound into the AEAD tag of every text payload.
    pub fn aad(algorithm: Algorithm) -> Vec<u8> {
        format!("veil/{TOKEN_VERSION}/{algorithm}").into_bytes()
    }

    pub fn to_token(&self) -> String {
        let kdf = self
            .kdf
            .as_ref()
            .map(|kd| encode_bytes(&kd.to_bytes()))
            .unwrap_or_default();
        let wrapped = self
            .wrapped_key
            .as_deref()
            .map(encode_bytes)
            .unwrap_or_default();

        [
            TOKEN_VERSION.to_string(),
            self.algorithm.as_str().to_string(),
            kdf,
            wrapped,
            encode_bytes(&self.nonce),
            encode_bytes(&self.tag),
            encode_bytes(&self.ciphertext),
        ]
        .join(".")
    }

    /// Parse a token. Every structural defect is reported as
    /// `InvalidKeyOrCorruptPayload`.
    pub fn from_token(token: &str) -> VeilResult<Self> {
        parse_token(token.trim()).ok_or(VeilError::InvalidKeyOrCorruptPayload)
    }
}

fn parse_token(token: &str) -> Option<CipherPayload> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != SEGMENTS || segments[0] != TOKEN_VERSION {
        return None;
    }

    let algorithm = match segments[1] {
        "AES-256" => Algorithm::Aes256,
        "RSA" => Algorithm::Rsa,
        _ => return None,
    };

    let kdf = match segments[2] {
        "" => None,
        s => Some(KeyDerivation::from_bytes(&decode_segment(s)?)?),
    };
    let wrapped_key = match segments[3] {
        "" => None,
        s => Some(decode_segment(s)?),
    };

    // AES payloads never carry a wrapped key; RSA payloads always do and
    // never carry a passphrase derivation.
    match algorithm {
        Algorithm::Aes256 if wrapped_key.is_some() => return None,
        Algorithm::Rsa if wrapped_key.is_none() || kdf.is_some() => return None,
        _ => {}
    }

    let nonce: [u8; NONCE_SIZE] = decode_segment(segments[4])?.try_into().ok()?;
    let tag: [u8; TAG_SIZE] = decode_segment(segments[5])?.try_into().ok()?;
    let ciphertext = decode_segment(segments[6])?;

    Some(CipherPayload {
        algorithm,
        kdf,
        wrapped_key,
        nonce,
        tag,
        ciphertext,
    })
}

fn decode_segment(s: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(s).ok()
}

impl fmt::Display for CipherPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl FromStr for CipherPayload {
    type Err = VeilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CipherPayload::from_token(s)
    }
}

/// Bytes → transportable text (unpadded URL-safe base64).
pub fn encode_bytes(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Transportable text → bytes.
pub fn decode_bytes(text: &str) -> VeilResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text.trim())
        .map_err(|e| VeilError::Encoding(format!("base64 decode: {e}")))
}
