//! Envelope wrapping of per-transfer secrets under RSA-OAEP.
//!
//! The wrapped form of a [`SymmetricSecret`] is the OAEP encryption of its
//! fixed 48-byte `key || nonce` layout. Only the holder of the matching
//! private key can recover it; any other key fails OAEP decoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use tracing::debug;

use crate::config::{AsymmetricScheme, CryptoConfig};
use crate::keys::{PrivateKey, PublicKey, SymmetricSecret};
use secureshare_common::{Error, Result, SensitiveBytes};

/// Wraps and unwraps symmetric secrets. Stateless apart from its scheme.
#[derive(Debug, Clone)]
pub struct EnvelopeCipher {
    scheme: AsymmetricScheme,
}

impl EnvelopeCipher {
    /// Create an envelope cipher for the configured scheme.
    pub fn new(config: &CryptoConfig) -> Self {
        Self {
            scheme: config.asymmetric_scheme,
        }
    }

    /// The scheme in use.
    pub fn scheme(&self) -> AsymmetricScheme {
        self.scheme
    }

    fn padding(&self) -> Oaep {
        match self.scheme {
            AsymmetricScheme::RsaOaepSha256 => Oaep::new::<sha2::Sha256>(),
            AsymmetricScheme::RsaOaepSha1 => Oaep::new::<sha1::Sha1>(),
        }
    }

    /// Wrap `secret` for the holder of `recipient`'s private key.
    ///
    /// # Errors
    /// - Malformed public key
    /// - Encryption failure
    pub fn wrap_secret(&self, secret: &SymmetricSecret, recipient: &PublicKey) -> Result<Vec<u8>> {
        let payload = secret.to_bytes();
        let wrapped = self.wrap_bytes(payload.as_bytes(), recipient)?;
        debug!(scheme = ?self.scheme, wrapped_len = wrapped.len(), "Wrapped symmetric secret");
        Ok(wrapped)
    }

    /// Recover the secret wrapped by [`wrap_secret`](Self::wrap_secret).
    ///
    /// # Errors
    /// - Malformed private key
    /// - Wrong private key or corrupted envelope
    /// - Decrypted payload is not exactly 48 bytes
    pub fn unwrap_secret(&self, wrapped: &[u8], private_key: &PrivateKey) -> Result<SymmetricSecret> {
        let payload = self.unwrap_bytes(wrapped, private_key)?;
        debug!(scheme = ?self.scheme, "Unwrapped symmetric secret");
        SymmetricSecret::from_bytes(payload.as_bytes())
    }

    /// Encrypt an arbitrary payload that fits in one OAEP block.
    ///
    /// Oversized payloads are rejected, never truncated.
    pub fn wrap_bytes(&self, payload: &[u8], recipient: &PublicKey) -> Result<Vec<u8>> {
        let public_key = recipient.parse()?;

        let max = self.scheme.max_payload(public_key.size());
        if payload.len() > max {
            return Err(Error::Crypto(format!(
                "Payload of {} bytes exceeds the {}-byte limit for this key",
                payload.len(),
                max
            )));
        }

        public_key
            .encrypt(&mut OsRng, self.padding(), payload)
            .map_err(|e| Error::Crypto(format!("Key wrap failed: {}", e)))
    }

    fn unwrap_bytes(&self, wrapped: &[u8], private_key: &PrivateKey) -> Result<SensitiveBytes> {
        let private_key = private_key.parse()?;

        private_key
            .decrypt(self.padding(), wrapped)
            .map(SensitiveBytes::new)
            .map_err(|_| Error::Crypto("Key unwrap failed".to_string()))
    }

    /// Text form of a wrapped secret as persisted in transfer records.
    pub fn encode_wrapped(wrapped: &[u8]) -> String {
        STANDARD.encode(wrapped)
    }

    /// Inverse of [`encode_wrapped`](Self::encode_wrapped).
    pub fn decode_wrapped(encoded: &str) -> Result<Vec<u8>> {
        STANDARD
            .decode(encoded)
            .map_err(|_| Error::Crypto("Wrapped secret is not valid base64".to_string()))
    }
}
