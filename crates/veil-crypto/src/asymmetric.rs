//! RSA hybrid encryption
//!
//! RSA-2048 OAEP can only carry ~190 bytes, so every payload is encrypted
//! with a one-time AES-256-GCM key and only that key goes through RSA:
//! ```text
//! wrapped_key = RSA-OAEP-SHA256(public, one_time_key)
//! ciphertext  = AES-256-GCM(one_time_key, nonce, aad = "veil/v1/RSA", plaintext)
//! ```

use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use veil_core::{Algorithm, VeilError, VeilResult};
use zeroize::Zeroizing;

use crate::codec::CipherPayload;
use crate::keys::{KeyMaterial, SecretKey};
use crate::symmetric;
use crate::KEY_SIZE;

/// Encrypt with the public half of the caller's key pair.
pub fn encrypt(plaintext: &[u8], key: &KeyMaterial) -> VeilResult<CipherPayload> {
    let pair = key.asymmetric()?;

    let one_time = SecretKey::generate();
    let aad = CipherPayload::aad(Algorithm::Rsa);
    let (nonce, tag, ciphertext) = symmetric::seal(&one_time, &aad, plaintext)?;
    let wrapped = wrap_key(pair.public(), &one_time)?;

    Ok(CipherPayload {
        algorithm: Algorithm::Rsa,
        kdf: None,
        wrapped_key: Some(wrapped),
        nonce,
        tag,
        ciphertext,
    })
}

/// Decrypt with the private half of the caller's key pair.
pub fn decrypt(payload: &CipherPayload, key: &KeyMaterial) -> VeilResult<Vec<u8>> {
    if payload.algorithm != Algorithm::Rsa {
        return Err(VeilError::AlgorithmMismatch {
            expected: Algorithm::Rsa,
            found: payload.algorithm,
        });
    }
    let private = key.asymmetric()?.private()?;
    let wrapped = payload
        .wrapped_key
        .as_deref()
        .ok_or(VeilError::InvalidKeyOrCorruptPayload)?;

    let one_time = unwrap_key(private, wrapped)?;
    let aad = CipherPayload::aad(Algorithm::Rsa);
    symmetric::open(
        &one_time,
        &payload.nonce,
        &payload.tag,
        &aad,
        &payload.ciphertext,
    )
}

/// Encrypt a one-time AES key to `public` with RSA-OAEP-SHA256.
pub(crate) fn wrap_key(public: &RsaPublicKey, key: &SecretKey) -> VeilResult<Vec<u8>> {
    public
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| VeilError::Other(anyhow::anyhow!("RSA key wrapping failed: {e}")))
}

/// Recover a one-time AES key. A wrong private key and a damaged wrapped key
/// are indistinguishable.
pub(crate) fn unwrap_key(private: &RsaPrivateKey, wrapped: &[u8]) -> VeilResult<SecretKey> {
    let plaintext = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| VeilError::InvalidKeyOrCorruptPayload)?,
    );
    let bytes: [u8; KEY_SIZE] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| VeilError::InvalidKeyOrCorruptPayload)?;
    Ok(SecretKey::from_bytes(bytes))
}
