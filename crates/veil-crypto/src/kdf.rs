//! Key derivation: Argon2id passphrase → 256-bit cipher key

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use veil_core::config::CryptoConfig;
use veil_core::{VeilError, VeilResult};

use crate::keys::SecretKey;
use crate::{KEY_SIZE, SALT_SIZE};

/// Upper bounds accepted when parameters come from a payload rather than
/// from our own configuration.
const MAX_MEM_COST_KIB: u32 = 1024 * 1024;
const MAX_TIME_COST: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id parameters for KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    pub fn from_config(config: &CryptoConfig) -> VeilResult<Self> {
        let params = Self {
            mem_cost_kib: config.argon2_mem_cost_kib,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
        };
        params.argon2_params()?;
        Ok(params)
    }

    fn argon2_params(&self) -> VeilResult<Params> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| VeilError::Config(format!("invalid Argon2id params: {e}")))
    }

    /// Bounds for parameters read from a payload. Anything Argon2 itself
    /// would refuse is rejected here too, so a damaged payload never
    /// surfaces as a configuration error.
    fn within_decode_limits(&self) -> bool {
        self.mem_cost_kib <= MAX_MEM_COST_KIB
            && (1..=MAX_TIME_COST).contains(&self.time_cost)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
            && self.argon2_params().is_ok()
    }
}

/// Salt plus parameters of a passphrase derivation, carried inside every
/// passphrase-keyed payload.
///
/// Encoded form: `mem_cost_kib (u32 BE) || time_cost (u32 BE) || parallelism (u32 BE) || salt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDerivation {
    pub params: KdfParams,
    pub salt: [u8; SALT_SIZE],
}

impl KeyDerivation {
    pub const ENCODED_LEN: usize = 12 + SALT_SIZE;

    /// Fresh random salt with the given parameters.
    pub fn generate(params: KdfParams) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        Self { params, salt }
    }

    pub fn derive(&self, passphrase: &SecretString) -> VeilResult<SecretKey> {
        derive_key(passphrase, &self.salt, &self.params)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.params.mem_cost_kib.to_be_bytes());
        out.extend_from_slice(&self.params.time_cost.to_be_bytes());
        out.extend_from_slice(&self.params.parallelism.to_be_bytes());
        out.extend_from_slice(&self.salt);
        out
    }

    /// Decode an embedded derivation. Rejects wrong lengths and parameters
    /// outside the accepted bounds.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != Self::ENCODED_LEN {
            return None;
        }
        let word = |i: usize| u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let params = KdfParams {
            mem_cost_kib: word(0),
            time_cost: word(4),
            parallelism: word(8),
        };
        if !params.within_decode_limits() {
            return None;
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&data[12..]);
        Some(Self { params, salt })
    }
}

/// Derive a 256-bit key from a passphrase and salt using Argon2id.
///
/// The salt is random per payload and stored alongside the ciphertext (it
/// does not need to be secret).
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> VeilResult<SecretKey> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.argon2_params()?);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;

    Ok(SecretKey::from_bytes(key))
}
