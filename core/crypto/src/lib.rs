//! Cryptographic primitives for SecureShare.
//!
//! This module provides:
//! - Per-transfer symmetric secrets and long-term RSA keypairs
//! - Envelope wrapping of a symmetric secret under a recipient's public key
//! - Chunked streaming AES-256 encryption for files of any size
//! - Passphrase sealing of private keys at rest (Argon2id + XChaCha20-Poly1305)
//!
//! # Security Guarantees
//! - Symmetric secrets are single-use: the stream codec consumes them
//! - All key material is zeroized on drop and redacted in `Debug`
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod config;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod sealed;
pub mod stream;

pub use config::{AsymmetricScheme, CryptoConfig, SymmetricAlgorithm};
pub use envelope::EnvelopeCipher;
pub use kdf::{derive_key, KdfParams};
pub use keys::{KeyPair, PrivateKey, PublicKey, Salt, SealingKey, SymmetricSecret};
pub use sealed::SealedPrivateKey;
pub use stream::{ChunkCipher, StreamCodec};
