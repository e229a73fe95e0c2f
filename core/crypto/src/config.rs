//! Algorithm selection passed explicitly into the cipher components.

use serde::{Deserialize, Serialize};

use secureshare_common::{Error, Result};

/// Default chunk size for streaming encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default RSA modulus size in bits.
pub const DEFAULT_RSA_KEY_BITS: usize = 2048;

/// Block size shared by every supported symmetric algorithm.
pub const BLOCK_SIZE: usize = 16;

/// Symmetric cipher used for file payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymmetricAlgorithm {
    /// AES-256 in CBC mode with PKCS#7 padding on the final block.
    #[default]
    Aes256Cbc,
    /// AES-256 in CTR mode with a 128-bit big-endian counter.
    Aes256Ctr,
}

/// Asymmetric scheme used to wrap symmetric secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsymmetricScheme {
    /// RSA-OAEP with SHA-256 for both the label hash and MGF1.
    #[default]
    RsaOaepSha256,
    /// RSA-OAEP with SHA-1, the OpenSSL `publicEncrypt` default.
    RsaOaepSha1,
}

impl AsymmetricScheme {
    /// Output length of the OAEP hash in bytes.
    pub const fn hash_len(self) -> usize {
        match self {
            AsymmetricScheme::RsaOaepSha256 => 32,
            AsymmetricScheme::RsaOaepSha1 => 20,
        }
    }

    /// Largest plaintext that fits in one OAEP block for a modulus of
    /// `modulus_bytes` bytes.
    pub const fn max_payload(self, modulus_bytes: usize) -> usize {
        modulus_bytes.saturating_sub(2 * self.hash_len() + 2)
    }
}

/// Cryptographic configuration for the envelope cipher and stream codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Cipher for file payloads.
    pub symmetric_algorithm: SymmetricAlgorithm,
    /// Scheme for wrapping the per-transfer secret.
    pub asymmetric_scheme: AsymmetricScheme,
    /// Modulus size for newly generated keypairs.
    pub rsa_key_bits: usize,
    /// Upper bound for plaintext chunks read from storage.
    pub chunk_size: usize,
}

impl CryptoConfig {
    /// Check that every parameter is supported.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.rsa_key_bits, 2048 | 3072 | 4096) {
            return Err(Error::Config(format!(
                "Unsupported RSA key size: {} (expected 2048, 3072 or 4096)",
                self.rsa_key_bits
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("Chunk size must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            symmetric_algorithm: SymmetricAlgorithm::default(),
            asymmetric_scheme: AsymmetricScheme::default(),
            rsa_key_bits: DEFAULT_RSA_KEY_BITS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
