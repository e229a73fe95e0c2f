//! Streaming symmetric encryption for large files.
//!
//! A [`ChunkCipher`] turns arbitrarily sized input chunks into output chunks
//! while holding at most one cipher block of carry-over, so files of any size
//! pass through in bounded memory. [`StreamCodec`] lifts that transform onto
//! [`ByteStream`]s.
//!
//! # Format
//! - `Aes256Cbc`: raw CBC ciphertext with PKCS#7 padding; always a non-zero
//!   multiple of 16 bytes
//! - `Aes256Ctr`: raw CTR ciphertext, same length as the plaintext
//!
//! Neither format carries a header; algorithm and secret come from the
//! transfer record.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::Aes256;
use futures::{stream, StreamExt};

use crate::config::{CryptoConfig, SymmetricAlgorithm, BLOCK_SIZE};
use crate::keys::SymmetricSecret;
use secureshare_common::{ByteStream, Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

enum Mode {
    CbcEncrypt(Aes256CbcEnc),
    CbcDecrypt(Aes256CbcDec),
    Ctr(Aes256Ctr),
}

/// Incremental encryptor or decryptor for one transfer.
///
/// Built from a [`SymmetricSecret`] that it consumes; call
/// [`update`](Self::update) for each input chunk and
/// [`finalize`](Self::finalize) exactly once at end of input.
pub struct ChunkCipher {
    mode: Mode,
    pending: Vec<u8>,
    finished: bool,
}

impl ChunkCipher {
    /// Create an encryptor.
    pub fn encryptor(algorithm: SymmetricAlgorithm, secret: SymmetricSecret) -> Result<Self> {
        let mode = match algorithm {
            SymmetricAlgorithm::Aes256Cbc => Mode::CbcEncrypt(
                Aes256CbcEnc::new_from_slices(secret.key(), secret.nonce())
                    .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))?,
            ),
            SymmetricAlgorithm::Aes256Ctr => Mode::Ctr(ctr_cipher(&secret)?),
        };
        Ok(Self::with_mode(mode))
    }

    /// Create a decryptor.
    pub fn decryptor(algorithm: SymmetricAlgorithm, secret: SymmetricSecret) -> Result<Self> {
        let mode = match algorithm {
            SymmetricAlgorithm::Aes256Cbc => Mode::CbcDecrypt(
                Aes256CbcDec::new_from_slices(secret.key(), secret.nonce())
                    .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))?,
            ),
            SymmetricAlgorithm::Aes256Ctr => Mode::Ctr(ctr_cipher(&secret)?),
        };
        Ok(Self::with_mode(mode))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            pending: Vec::with_capacity(2 * BLOCK_SIZE),
            finished: false,
        }
    }

    /// Transform the next input chunk.
    ///
    /// May return fewer bytes than it was given (CBC holds back a partial
    /// block, and on decryption the last full block) or an empty vector.
    pub fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::Crypto("Cipher already finalized".to_string()));
        }

        match &mut self.mode {
            Mode::Ctr(cipher) => {
                let mut out = input.to_vec();
                cipher.apply_keystream(&mut out);
                Ok(out)
            }
            Mode::CbcEncrypt(cipher) => {
                self.pending.extend_from_slice(input);
                let ready = self.pending.len() - self.pending.len() % BLOCK_SIZE;
                let mut out: Vec<u8> = self.pending.drain(..ready).collect();
                for block in out.chunks_exact_mut(BLOCK_SIZE) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                Ok(out)
            }
            Mode::CbcDecrypt(cipher) => {
                self.pending.extend_from_slice(input);
                // The final block carries the padding; keep it until finalize.
                let len = self.pending.len();
                let keep = match len % BLOCK_SIZE {
                    0 => BLOCK_SIZE.min(len),
                    rem => rem,
                };
                let ready = len - keep;
                let mut out: Vec<u8> = self.pending.drain(..ready).collect();
                for block in out.chunks_exact_mut(BLOCK_SIZE) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                Ok(out)
            }
        }
    }

    /// Flush the final block.
    ///
    /// # Errors
    /// - CBC decryption: ciphertext length is not a non-zero multiple of the
    ///   block size, or the padding is invalid
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::Crypto("Cipher already finalized".to_string()));
        }
        self.finished = true;

        match &mut self.mode {
            Mode::Ctr(_) => Ok(Vec::new()),
            Mode::CbcEncrypt(cipher) => {
                let pad = BLOCK_SIZE - self.pending.len();
                let mut block = std::mem::take(&mut self.pending);
                block.resize(BLOCK_SIZE, pad as u8);
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
                Ok(block)
            }
            Mode::CbcDecrypt(cipher) => {
                if self.pending.len() != BLOCK_SIZE {
                    return Err(Error::Crypto(
                        "Ciphertext length is not a multiple of the block size".to_string(),
                    ));
                }
                let mut block = std::mem::take(&mut self.pending);
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(&mut block));
                let unpadded = strip_padding(&block)?;
                block.truncate(unpadded);
                Ok(block)
            }
        }
    }
}

fn ctr_cipher(secret: &SymmetricSecret) -> Result<Aes256Ctr> {
    Aes256Ctr::new_from_slices(secret.key(), secret.nonce())
        .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))
}

/// Length of `block` without its PKCS#7 padding.
fn strip_padding(block: &[u8]) -> Result<usize> {
    let pad = block[BLOCK_SIZE - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(Error::Crypto("Invalid padding".to_string()));
    }
    if !block[BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad) {
        return Err(Error::Crypto("Invalid padding".to_string()));
    }
    Ok(BLOCK_SIZE - pad)
}

/// Applies symmetric encryption or decryption to byte streams.
#[derive(Debug, Clone)]
pub struct StreamCodec {
    algorithm: SymmetricAlgorithm,
}

impl StreamCodec {
    /// Create a codec for the configured algorithm.
    pub fn new(config: &CryptoConfig) -> Self {
        Self {
            algorithm: config.symmetric_algorithm,
        }
    }

    /// The algorithm in use.
    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Lazily encrypt `source`, consuming `secret`.
    ///
    /// The returned stream is finite and not restartable; a retry needs a
    /// fresh secret. Errors from `source` are forwarded and end the stream.
    pub fn encrypt_stream(&self, source: ByteStream, secret: SymmetricSecret) -> Result<ByteStream> {
        let cipher = ChunkCipher::encryptor(self.algorithm, secret)?;
        Ok(transform(source, cipher))
    }

    /// Lazily decrypt `source`, consuming `secret`.
    ///
    /// Padding failures surface as a crypto error on the final item.
    pub fn decrypt_stream(&self, source: ByteStream, secret: SymmetricSecret) -> Result<ByteStream> {
        let cipher = ChunkCipher::decryptor(self.algorithm, secret)?;
        Ok(transform(source, cipher))
    }
}

type TransformState = (ByteStream, Option<ChunkCipher>);

fn transform(source: ByteStream, cipher: ChunkCipher) -> ByteStream {
    Box::pin(stream::try_unfold((source, Some(cipher)), next_chunk))
}

/// Pull input until the cipher yields output; `None` cipher marks a
/// finalized transform.
async fn next_chunk(
    (mut source, cipher): TransformState,
) -> Result<Option<(Vec<u8>, TransformState)>> {
    let Some(mut cipher) = cipher else {
        return Ok(None);
    };
    loop {
        match source.next().await {
            Some(chunk) => {
                let out = cipher.update(&chunk?)?;
                if !out.is_empty() {
                    return Ok(Some((out, (source, Some(cipher)))));
                }
            }
            None => {
                let out = cipher.finalize()?;
                if out.is_empty() {
                    return Ok(None);
                }
                return Ok(Some((out, (source, None))));
            }
        }
    }
}
