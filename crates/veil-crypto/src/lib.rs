//! veil-crypto: the transform engine
//!
//! Transforms:
//! ```text
//! AES-256  text  : AES-256-GCM(key = raw 256-bit secret | Argon2id(passphrase, salt))
//! RSA      text  : AES-256-GCM(one-time key) + RSA-2048-OAEP-SHA256(one-time key)
//! SHA-256  text  : hex(SHA-256(bytes))
//! files          : same keys, chunked AEAD stream; nonce = prefix || chunk counter || last flag
//! ```
//!
//! Text results travel as a single self-describing token (see [`codec`]);
//! file results as a binary container (see [`stream`]). [`Engine`] is the
//! entry point used by the daemon and the CLI.

pub mod asymmetric;
pub mod codec;
pub mod digest;
pub mod engine;
pub mod kdf;
pub mod keys;
pub mod stream;
pub mod symmetric;

pub use codec::CipherPayload;
pub use digest::{digest, DigestAccumulator, DigestResult};
pub use engine::{Engine, FileArtifact};
pub use kdf::{derive_key, KdfParams, KeyDerivation};
pub use keys::{generate_key, KeyMaterial, RsaKeyPair, SecretKey, SymmetricSecret};
pub use stream::{CancelFlag, ChunkStep, Progress, StreamProcessor};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of an Argon2id salt
pub const SALT_SIZE: usize = 16;

/// RSA modulus size for generated key pairs
pub const RSA_BITS: usize = 2048;
