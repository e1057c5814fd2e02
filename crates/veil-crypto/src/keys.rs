//! Key material: raw secrets, passphrases, RSA key pairs, and key generation
//!
//! Text forms:
//! ```text
//! AES-256 : base64(32 random bytes)            (anything else is a passphrase)
//! RSA     : base64(SPKI DER public) "." base64(PKCS#8 DER private)
//!           base64(SPKI DER public)            (public half only, encrypt-only)
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use veil_core::{Algorithm, VeilError, VeilResult};
use zeroize::{Zeroize, Zeroizing};

use crate::{KEY_SIZE, RSA_BITS};

/// A 256-bit cipher key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Fresh key from the platform CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The shared secret of the symmetric cipher.
#[derive(Debug)]
pub enum SymmetricSecret {
    /// Exactly 256 bits, used as the AES key directly
    Raw(SecretKey),
    /// Anything else; stretched with Argon2id and a per-payload salt
    Passphrase(SecretString),
}

/// RSA key pair. The private half is optional so that a public-only key can
/// still encrypt.
#[derive(Clone)]
pub struct RsaKeyPair {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl RsaKeyPair {
    pub fn generate() -> VeilResult<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS)
            .map_err(|e| anyhow::anyhow!("RSA key generation failed: {e}"))?;
        Ok(Self {
            public: RsaPublicKey::from(&private),
            private: Some(private),
        })
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private(&self) -> VeilResult<&RsaPrivateKey> {
        self.private
            .as_ref()
            .ok_or_else(|| VeilError::MalformedKey("RSA key has no private half".into()))
    }

    /// Drop the private half.
    pub fn public_only(&self) -> Self {
        Self {
            public: self.public.clone(),
            private: None,
        }
    }

    pub fn to_text(&self) -> VeilResult<String> {
        let public = self
            .public
            .to_public_key_der()
            .map_err(|e| anyhow::anyhow!("encoding RSA public key: {e}"))?;
        let mut text = STANDARD.encode(public.as_bytes());
        if let Some(private) = &self.private {
            let der = private
                .to_pkcs8_der()
                .map_err(|e| anyhow::anyhow!("encoding RSA private key: {e}"))?;
            text.push('.');
            text.push_str(&STANDARD.encode(der.as_bytes()));
        }
        Ok(text)
    }

    pub fn from_text(text: &str) -> VeilResult<Self> {
        let text = text.trim();
        let (public_b64, private_b64) = match text.split_once('.') {
            Some((public, private)) => (public, Some(private)),
            None => (text, None),
        };

        let public_der = STANDARD
            .decode(public_b64)
            .map_err(|e| VeilError::MalformedKey(format!("RSA public half: {e}")))?;
        let public = RsaPublicKey::from_public_key_der(&public_der)
            .map_err(|e| VeilError::MalformedKey(format!("RSA public half: {e}")))?;

        let private = match private_b64 {
            Some(b64) => {
                let der = Zeroizing::new(
                    STANDARD
                        .decode(b64)
                        .map_err(|e| VeilError::MalformedKey(format!("RSA private half: {e}")))?,
                );
                let private = RsaPrivateKey::from_pkcs8_der(&der)
                    .map_err(|e| VeilError::MalformedKey(format!("RSA private half: {e}")))?;
                if RsaPublicKey::from(&private) != public {
                    return Err(VeilError::MalformedKey(
                        "RSA public and private halves do not belong together".into(),
                    ));
                }
                Some(private)
            }
            None => None,
        };

        Ok(Self { public, private })
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public", &"[RSA public key]")
            .field(
                "private",
                &self.private.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Caller-owned key material, bound to exactly one cipher algorithm.
#[derive(Debug)]
pub enum KeyMaterial {
    Symmetric(SymmetricSecret),
    Asymmetric(RsaKeyPair),
}

impl KeyMaterial {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyMaterial::Symmetric(_) => Algorithm::Aes256,
            KeyMaterial::Asymmetric(_) => Algorithm::Rsa,
        }
    }

    /// Interpret caller-supplied key text for `algorithm`.
    pub fn parse(algorithm: Algorithm, text: &str) -> VeilResult<Self> {
        if text.is_empty() {
            return Err(VeilError::EmptyInput("key".into()));
        }
        match algorithm {
            Algorithm::Aes256 => Ok(KeyMaterial::Symmetric(parse_symmetric(text))),
            Algorithm::Rsa => Ok(KeyMaterial::Asymmetric(RsaKeyPair::from_text(text)?)),
            Algorithm::Sha256 => Err(VeilError::UnsupportedAlgorithm(format!(
                "{algorithm} takes no key"
            ))),
        }
    }

    /// Fresh key material for a cipher algorithm.
    pub fn generate(algorithm: Algorithm) -> VeilResult<Self> {
        match algorithm {
            Algorithm::Aes256 => Ok(KeyMaterial::Symmetric(SymmetricSecret::Raw(
                SecretKey::generate(),
            ))),
            Algorithm::Rsa => Ok(KeyMaterial::Asymmetric(RsaKeyPair::generate()?)),
            Algorithm::Sha256 => Err(VeilError::UnsupportedAlgorithm(format!(
                "{algorithm} takes no key"
            ))),
        }
    }

    /// Transportable text form (see module docs).
    pub fn to_text(&self) -> VeilResult<String> {
        match self {
            KeyMaterial::Symmetric(SymmetricSecret::Raw(key)) => Ok(STANDARD.encode(key.as_bytes())),
            KeyMaterial::Symmetric(SymmetricSecret::Passphrase(p)) => {
                Ok(p.expose_secret().to_string())
            }
            KeyMaterial::Asymmetric(pair) => pair.to_text(),
        }
    }

    pub fn symmetric(&self) -> VeilResult<&SymmetricSecret> {
        match self {
            KeyMaterial::Symmetric(secret) => Ok(secret),
            other => Err(VeilError::AlgorithmMismatch {
                expected: Algorithm::Aes256,
                found: other.algorithm(),
            }),
        }
    }

    pub fn asymmetric(&self) -> VeilResult<&RsaKeyPair> {
        match self {
            KeyMaterial::Asymmetric(pair) => Ok(pair),
            other => Err(VeilError::AlgorithmMismatch {
                expected: Algorithm::Rsa,
                found: other.algorithm(),
            }),
        }
    }
}

fn parse_symmetric(text: &str) -> SymmetricSecret {
    if let Ok(decoded) = STANDARD.decode(text.trim()) {
        let decoded = Zeroizing::new(decoded);
        if decoded.len() == KEY_SIZE {
            let mut bytes = [0u8; KEY_SIZE];
            bytes.copy_from_slice(&decoded);
            return SymmetricSecret::Raw(SecretKey::from_bytes(bytes));
        }
    }
    SymmetricSecret::Passphrase(SecretString::from(text.to_string()))
}

/// Generate a key for `algorithm` and return its text form.
pub fn generate_key(algorithm: Algorithm) -> VeilResult<String> {
    let key = KeyMaterial::generate(algorithm)?;
    tracing::debug!(algorithm = %algorithm, "generated key material");
    key.to_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn test_pair() -> &'static RsaKeyPair {
        static PAIR: OnceLock<RsaKeyPair> = OnceLock::new();
        PAIR.get_or_init(|| RsaKeyPair::generate().unwrap())
    }

    #[test]
    fn test_symmetric_key_generation() {
        let k1 = generate_key(Algorithm::Aes256).unwrap();
        let k2 = generate_key(Algorithm::Aes256).unwrap();
        assert_ne!(k1, k2, "random keys must differ");
        assert_eq!(STANDARD.decode(&k1).unwrap().len(), KEY_SIZE);
    }

    #[test]
    fn test_generated_symmetric_key_parses_as_raw() {
        let text = generate_key(Algorithm::Aes256).unwrap();
        let key = KeyMaterial::parse(Algorithm::Aes256, &text).unwrap();
        assert!(matches!(
            key,
            KeyMaterial::Symmetric(SymmetricSecret::Raw(_))
        ));
        assert_eq!(key.to_text().unwrap(), text);
    }

    #[test]
    fn test_other_text_is_passphrase() {
        let key = KeyMaterial::parse(Algorithm::Aes256, "correct horse battery staple").unwrap();
        assert!(matches!(
            key,
            KeyMaterial::Symmetric(SymmetricSecret::Passphrase(_))
        ));

        // valid base64, wrong length
        let short = STANDARD.encode([7u8; 16]);
        let key = KeyMaterial::parse(Algorithm::Aes256, &short).unwrap();
        assert!(matches!(
            key,
            KeyMaterial::Symmetric(SymmetricSecret::Passphrase(_))
        ));
    }

    #[test]
    fn test_hash_has_no_key() {
        assert!(matches!(
            generate_key(Algorithm::Sha256),
            Err(VeilError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            KeyMaterial::parse(Algorithm::Sha256, "anything"),
            Err(VeilError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            KeyMaterial::parse(Algorithm::Aes256, ""),
            Err(VeilError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_rsa_text_roundtrip() {
        let pair = test_pair();
        let text = pair.to_text().unwrap();
        assert_eq!(text.matches('.').count(), 1);

        let parsed = RsaKeyPair::from_text(&text).unwrap();
        assert_eq!(parsed.public(), pair.public());
        assert!(parsed.private().is_ok());
    }

    #[test]
    fn test_rsa_public_only() {
        let public_text = test_pair().public_only().to_text().unwrap();
        assert!(!public_text.contains('.'));

        let parsed = RsaKeyPair::from_text(&public_text).unwrap();
        assert!(matches!(parsed.private(), Err(VeilError::MalformedKey(_))));
    }

    #[test]
    fn test_rsa_garbage_rejected() {
        assert!(matches!(
            KeyMaterial::parse(Algorithm::Rsa, "not-a-key"),
            Err(VeilError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_mismatched_accessors() {
        let key = KeyMaterial::parse(Algorithm::Aes256, "passphrase").unwrap();
        assert!(matches!(
            key.asymmetric(),
            Err(VeilError::AlgorithmMismatch {
                expected: Algorithm::Rsa,
                found: Algorithm::Aes256
            })
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = KeyMaterial::parse(Algorithm::Aes256, &generate_key(Algorithm::Aes256).unwrap())
            .unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
    }
}
