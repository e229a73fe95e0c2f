//! Passphrase-sealed private keys for on-disk key directories.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::aead;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{PrivateKey, Salt};
use secureshare_common::{Error, Result};

/// Current sealed-key format version.
pub const SEALED_KEY_VERSION: u32 = 1;

/// A private key PEM encrypted under an Argon2id-derived key.
///
/// The owner's user id is bound as associated data, so a sealed file copied
/// over another user's key file fails to open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedPrivateKey {
    pub version: u32,
    pub salt: Salt,
    pub kdf_params: KdfParams,
    /// Base64 of nonce || ciphertext || tag.
    pub ciphertext: String,
}

impl SealedPrivateKey {
    /// Seal `key` for `owner` under `passphrase`.
    pub fn seal(
        key: &PrivateKey,
        owner: &str,
        passphrase: &[u8],
        kdf_params: KdfParams,
    ) -> Result<Self> {
        let salt = Salt::generate();
        let sealing_key = derive_key(passphrase, &salt, &kdf_params)?;
        let encrypted = aead::encrypt(
            sealing_key.as_bytes(),
            key.as_pem().as_bytes(),
            owner.as_bytes(),
        )?;

        Ok(Self {
            version: SEALED_KEY_VERSION,
            salt,
            kdf_params,
            ciphertext: STANDARD.encode(encrypted),
        })
    }

    /// Recover the private key.
    ///
    /// # Errors
    /// - Unsupported version
    /// - Wrong passphrase, wrong owner or tampered file (crypto error)
    pub fn open(&self, owner: &str, passphrase: &[u8]) -> Result<PrivateKey> {
        if self.version != SEALED_KEY_VERSION {
            return Err(Error::Crypto(format!(
                "Unsupported sealed key version: {}",
                self.version
            )));
        }

        let encrypted = STANDARD
            .decode(&self.ciphertext)
            .map_err(|_| Error::Crypto("Sealed key is not valid base64".to_string()))?;
        let sealing_key = derive_key(passphrase, &self.salt, &self.kdf_params)?;
        let plaintext = aead::decrypt(sealing_key.as_bytes(), &encrypted, owner.as_bytes())?;

        let pem = String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("Sealed key is not UTF-8".to_string()))?;
        Ok(PrivateKey::from_pem(pem))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
