//! Key types with secure memory handling.
//!
//! All secret key types zeroize their memory on drop and never print their
//! contents through `Debug`.

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::CryptoConfig;
use secureshare_common::{Error, Result, SensitiveBytes};

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the symmetric nonce in bytes (128-bit).
pub const NONCE_LENGTH: usize = 16;

/// Length of a serialized [`SymmetricSecret`]: `key || nonce`, no padding.
pub const SECRET_LENGTH: usize = KEY_LENGTH + NONCE_LENGTH;

/// Per-transfer symmetric key and nonce.
///
/// Deliberately not `Clone`: a secret is moved into exactly one encryption
/// or decryption stream, so a key/nonce pair cannot be reused for a second
/// plaintext.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricSecret {
    key: [u8; KEY_LENGTH],
    nonce: [u8; NONCE_LENGTH],
}

impl SymmetricSecret {
    /// Generate a fresh random key and nonce from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut nonce);
        Self { key, nonce }
    }

    /// Serialize as `key || nonce` (48 bytes).
    pub fn to_bytes(&self) -> SensitiveBytes {
        let mut bytes = Vec::with_capacity(SECRET_LENGTH);
        bytes.extend_from_slice(&self.key);
        bytes.extend_from_slice(&self.nonce);
        SensitiveBytes::new(bytes)
    }

    /// Parse the `key || nonce` layout.
    ///
    /// # Errors
    /// - Returns a crypto error unless `bytes` is exactly SECRET_LENGTH long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_LENGTH {
            return Err(Error::Crypto(format!(
                "Invalid secret length: expected {}, got {}",
                SECRET_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        let mut nonce = [0u8; NONCE_LENGTH];
        key.copy_from_slice(&bytes[..KEY_LENGTH]);
        nonce.copy_from_slice(&bytes[KEY_LENGTH..]);
        Ok(Self { key, nonce })
    }

    /// Get the key bytes.
    pub fn key(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Get the nonce bytes.
    pub fn nonce(&self) -> &[u8; NONCE_LENGTH] {
        &self.nonce
    }
}

impl fmt::Debug for SymmetricSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricSecret([REDACTED])")
    }
}

/// A user's RSA public key in PEM form.
///
/// The PEM is not parsed on construction; a malformed key surfaces as a
/// crypto error when it is first used to wrap a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pem: String,
}

impl PublicKey {
    /// Wrap a PEM string (SPKI or PKCS#1).
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self { pem: pem.into() }
    }

    /// Get the PEM text.
    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    pub(crate) fn parse(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(&self.pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(&self.pem))
            .map_err(|_| Error::Crypto("Malformed public key".to_string()))
    }
}

/// A user's RSA private key in PEM form. Zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey {
    pem: Zeroizing<String>,
}

impl PrivateKey {
    /// Wrap a PEM string (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self {
            pem: Zeroizing::new(pem.into()),
        }
    }

    /// Get the PEM text.
    ///
    /// # Security
    /// The returned string should be used immediately and not stored.
    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    pub(crate) fn parse(&self) -> Result<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_pem(&self.pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&self.pem))
            .map_err(|_| Error::Crypto("Malformed private key".to_string()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// A user's long-term keypair, issued once at account creation.
#[derive(Debug, Clone)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Generate a new RSA keypair of `config.rsa_key_bits`.
    ///
    /// This is CPU-bound (hundreds of milliseconds for 2048 bits); async
    /// callers should run it on a blocking thread.
    pub fn generate(config: &CryptoConfig) -> Result<Self> {
        config.validate()?;

        let private = RsaPrivateKey::new(&mut OsRng, config.rsa_key_bits)
            .map_err(|e| Error::Crypto(format!("Key generation failed: {}", e)))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("Private key encoding failed: {}", e)))?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("Public key encoding failed: {}", e)))?;

        Ok(Self {
            public: PublicKey::from_pem(public_pem),
            private: PrivateKey { pem: private_pem },
        })
    }

    /// Get the public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Get the private half.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}

/// Key used to seal private keys at rest, derived from a passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey {
    key: [u8; KEY_LENGTH],
}

impl SealingKey {
    /// Create a sealing key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealingKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
