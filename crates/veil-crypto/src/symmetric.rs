//! AES-256-GCM authenticated encryption of in-memory payloads
//!
//! The key is either the raw 256-bit secret or Argon2id(passphrase, salt);
//! the salt and parameters ride along in the payload. Every call draws a
//! fresh 96-bit nonce from the OS CSPRNG.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use veil_core::{Algorithm, VeilError, VeilResult};

use crate::codec::CipherPayload;
use crate::kdf::{KdfParams, KeyDerivation};
use crate::keys::{KeyMaterial, SecretKey, SymmetricSecret};
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under the caller's AES-256 key material.
pub fn encrypt(
    plaintext: &[u8],
    key: &KeyMaterial,
    kdf_params: &KdfParams,
) -> VeilResult<CipherPayload> {
    let (cipher_key, kdf) = match key.symmetric()? {
        SymmetricSecret::Raw(raw) => (raw.clone(), None),
        SymmetricSecret::Passphrase(passphrase) => {
            let kd = KeyDerivation::generate(*kdf_params);
            (kd.derive(passphrase)?, Some(kd))
        }
    };

    let aad = CipherPayload::aad(Algorithm::Aes256);
    let (nonce, tag, ciphertext) = seal(&cipher_key, &aad, plaintext)?;

    Ok(CipherPayload {
        algorithm: Algorithm::Aes256,
        kdf,
        wrapped_key: None,
        nonce,
        tag,
        ciphertext,
    })
}

/// Decrypt an AES-256 payload. Nothing is returned unless the tag verifies.
pub fn decrypt(payload: &CipherPayload, key: &KeyMaterial) -> VeilResult<Vec<u8>> {
    if payload.algorithm != Algorithm::Aes256 {
        return Err(VeilError::AlgorithmMismatch {
            expected: Algorithm::Aes256,
            found: payload.algorithm,
        });
    }

    let cipher_key = match (key.symmetric()?, &payload.kdf) {
        (SymmetricSecret::Raw(raw), None) => raw.clone(),
        (SymmetricSecret::Passphrase(passphrase), Some(kd)) => kd.derive(passphrase)?,
        // raw key against a passphrase payload or vice versa: wrong key
        _ => return Err(VeilError::InvalidKeyOrCorruptPayload),
    };

    let aad = CipherPayload::aad(Algorithm::Aes256);
    open(
        &cipher_key,
        &payload.nonce,
        &payload.tag,
        &aad,
        &payload.ciphertext,
    )
}

/// Encrypt with a fresh random nonce.
///
/// Returns `(nonce, tag, ciphertext)`.
pub(crate) fn seal(
    key: &SecretKey,
    aad: &[u8],
    plaintext: &[u8],
) -> VeilResult<([u8; NONCE_SIZE], [u8; TAG_SIZE], Vec<u8>)> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = seal_in_place(&cipher_for(key), &nonce, aad, &mut buffer)?;
    Ok((nonce, tag, buffer))
}

pub(crate) fn open(
    key: &SecretKey,
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> VeilResult<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    open_in_place(&cipher_for(key), nonce, tag, aad, &mut buffer)?;
    Ok(buffer)
}

pub(crate) fn cipher_for(key: &SecretKey) -> Aes256Gcm {
    Aes256Gcm::new(key.as_bytes().into())
}

pub(crate) fn seal_in_place(
    cipher: &Aes256Gcm,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
) -> VeilResult<[u8; TAG_SIZE]> {
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buffer)
        .map_err(|e| anyhow::anyhow!("AES-GCM encryption failed: {e}"))?;
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Decrypt in place. On failure the buffer contents are unspecified and
/// must be discarded.
pub(crate) fn open_in_place(
    cipher: &Aes256Gcm,
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
) -> VeilResult<()> {
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| VeilError::InvalidKeyOrCorruptPayload)
}
