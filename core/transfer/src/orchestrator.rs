//! Send and receive pipelines.
//!
//! Send: validate → generating_secret → wrapping_key → encrypting →
//! persisting_record → complete. A failure before the record write discards
//! the ciphertext sink; a failed record write deletes the committed
//! ciphertext. Once the record write has started, cancellation never removes
//! the ciphertext: an orphaned blob is tolerated, a dangling record is not.
//!
//! Receive: record lookup → authorize → fetch private key → unwrap →
//! decrypting → delivery. Staged plaintext is removed when the delivery
//! ends, fails or is dropped.

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::authorizer::TransferAuthorizer;
use crate::cleanup::BlobGuard;
use crate::config::{ReceiveMode, TransferConfig};
use crate::delivery::{staged_stream, Delivery};
use crate::directory::UserDirectory;
use crate::record::{TransferRecord, TransferSummary};
use crate::store::RecordStore;
use secureshare_common::{BlobPath, ByteStream, Error, Result, TransferId, UserId};
use secureshare_crypto::{CryptoConfig, EnvelopeCipher, StreamCodec, SymmetricSecret};
use secureshare_storage::{write_stream, BlobStore};

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub plaintext_size: u64,
    pub ciphertext_size: u64,
}

/// Composes the envelope cipher, stream codec, authorizer and stores into
/// the user-facing transfer operations.
///
/// Holds no per-transfer state; any number of sends and receives may run
/// concurrently on one instance.
pub struct TransferOrchestrator {
    config: TransferConfig,
    ciphertext_dir: BlobPath,
    staging_dir: BlobPath,
    envelope: EnvelopeCipher,
    codec: StreamCodec,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    users: Arc<dyn UserDirectory>,
}

impl TransferOrchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        config: TransferConfig,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            ciphertext_dir: config.ciphertext_dir()?,
            staging_dir: config.staging_dir()?,
            envelope: EnvelopeCipher::new(&config.crypto),
            codec: StreamCodec::new(&config.crypto),
            config,
            blobs,
            records,
            users,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Encrypt `source` for `recipient` and record the transfer.
    ///
    /// # Preconditions
    /// - `sender` has been authenticated by the caller
    ///
    /// # Postconditions
    /// - On success, the ciphertext is durably stored and a record pointing
    ///   at it exists
    /// - On failure, neither a ciphertext blob nor a record exists
    /// - If dropped once the record write has started, the ciphertext is kept
    ///
    /// # Errors
    /// - `Validation`: bad file name, or plaintext larger than `max_file_size`
    /// - `NotFound`: unknown recipient
    /// - `Crypto`: malformed recipient key
    /// - `Io` / `Storage`: source or blob store failure
    pub async fn send(
        &self,
        source: ByteStream,
        file_name: &str,
        sender: &UserId,
        recipient: &UserId,
    ) -> Result<TransferReceipt> {
        let file_name = sanitize_file_name(file_name)?;
        let recipient_key = self.users.get_public_key(recipient).await?;

        let transfer_id = TransferId::generate();
        let location = self.ciphertext_dir.join(&ciphertext_blob_name(&file_name))?;

        debug!(transfer_id = %transfer_id, stage = "generating_secret");
        let secret = SymmetricSecret::generate();

        // Wrapping first lets the secret be moved into the encryptor.
        debug!(transfer_id = %transfer_id, stage = "wrapping_key");
        let wrapped = self.envelope.wrap_secret(&secret, &recipient_key)?;

        debug!(transfer_id = %transfer_id, stage = "encrypting", location = %location);
        let plaintext_size = Arc::new(AtomicU64::new(0));
        let limited = limit_size(source, self.config.max_file_size, Arc::clone(&plaintext_size));
        let ciphertext = self.codec.encrypt_stream(limited, secret)?;
        let blob = match write_stream(self.blobs.as_ref(), &location, ciphertext).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(transfer_id = %transfer_id, error = %e, "Send failed while encrypting");
                return Err(e);
            }
        };

        debug!(transfer_id = %transfer_id, stage = "persisting_record");
        let record = TransferRecord {
            id: transfer_id.clone(),
            file_name: file_name.clone(),
            sender_id: sender.clone(),
            receiver_id: recipient.clone(),
            ciphertext_location: location,
            wrapped_secret: EnvelopeCipher::encode_wrapped(&wrapped),
            symmetric_algorithm: self.codec.algorithm(),
            asymmetric_scheme: self.envelope.scheme(),
            ciphertext_size: blob.size,
            created_at: Utc::now(),
        };

        // The store may commit even if this future is dropped mid-await, so the
        // ciphertext is only removed on an explicit failure.
        if let Err(e) = self.records.create_record(&record).await {
            warn!(transfer_id = %transfer_id, error = %e, "Send failed while persisting record");
            let orphan = BlobGuard::new(Arc::clone(&self.blobs), record.ciphertext_location);
            if let Err(cleanup) = orphan.discard().await {
                warn!(transfer_id = %transfer_id, error = %cleanup, "Failed to remove orphaned ciphertext");
            }
            return Err(e);
        }

        let plaintext_size = plaintext_size.load(Ordering::SeqCst);
        info!(
            transfer_id = %transfer_id,
            sender = %sender,
            recipient = %recipient,
            size = plaintext_size,
            stage = "complete",
            "Transfer sent"
        );

        Ok(TransferReceipt {
            transfer_id,
            file_name,
            plaintext_size,
            ciphertext_size: blob.size,
        })
    }

    /// Send a plaintext file an upload layer already placed in the blob store,
    /// then delete it.
    ///
    /// The staged upload is deleted whether the send succeeds, fails or is
    /// cancelled. A failure to delete it is logged, not returned.
    ///
    /// # Errors
    /// - `Validation` if nothing is stored at `upload`
    /// - Everything [`send`](Self::send) returns
    pub async fn send_staged(
        &self,
        upload: &BlobPath,
        file_name: &str,
        sender: &UserId,
        recipient: &UserId,
    ) -> Result<TransferReceipt> {
        if !self.blobs.exists(upload).await? {
            return Err(Error::Validation("No uploaded file".to_string()));
        }

        let upload_guard = BlobGuard::new(Arc::clone(&self.blobs), upload.clone());
        let result = match self.blobs.open_read(upload).await {
            Ok(source) => self.send(source, file_name, sender, recipient).await,
            Err(e) => Err(e),
        };

        debug!(upload = %upload, stage = "cleanup");
        if let Err(e) = upload_guard.discard().await {
            warn!(upload = %upload, error = %e, "Failed to remove uploaded plaintext");
        }

        result
    }

    /// Decrypt a transfer for `requester`.
    ///
    /// # Preconditions
    /// - `requester` has been authenticated by the caller
    ///
    /// # Postconditions
    /// - The requester's private key is fetched only after authorization
    /// - No plaintext remains in the blob store once the returned delivery
    ///   is consumed or dropped
    ///
    /// # Errors
    /// - `NotFound`: unknown transfer id
    /// - `Unauthorized`: requester is not the receiver
    /// - `Crypto`: unwrap or decryption failure
    /// - `Storage`: the recorded ciphertext is missing
    pub async fn receive(&self, transfer_id: &TransferId, requester: &UserId) -> Result<Delivery> {
        debug!(transfer_id = %transfer_id, stage = "record_lookup");
        let record = self.records.get_record(transfer_id).await?;

        debug!(transfer_id = %transfer_id, stage = "authorize");
        if let Err(e) = TransferAuthorizer::authorize(requester, &record) {
            warn!(transfer_id = %transfer_id, requester = %requester, "Receive denied");
            return Err(e);
        }

        debug!(transfer_id = %transfer_id, stage = "fetch_private_key");
        let private_key = self.users.get_private_key(requester).await?;

        debug!(transfer_id = %transfer_id, stage = "unwrap_secret");
        let wrapped = EnvelopeCipher::decode_wrapped(&record.wrapped_secret)?;
        let envelope = EnvelopeCipher::new(&CryptoConfig {
            asymmetric_scheme: record.asymmetric_scheme,
            ..self.config.crypto.clone()
        });
        let secret = tokio::task::spawn_blocking(move || envelope.unwrap_secret(&wrapped, &private_key))
            .await
            .map_err(|e| Error::Crypto(format!("Key unwrap task failed: {}", e)))?
            .inspect_err(|e| {
                warn!(transfer_id = %transfer_id, error = %e, "Key unwrap failed");
            })?;

        let ciphertext = match self.blobs.open_read(&record.ciphertext_location).await {
            Ok(stream) => stream,
            Err(Error::NotFound(_)) => {
                return Err(Error::Storage(format!(
                    "Ciphertext of transfer {} is missing",
                    transfer_id
                )));
            }
            Err(e) => return Err(e),
        };

        debug!(transfer_id = %transfer_id, stage = "decrypting", mode = ?self.config.receive_mode);
        let codec = StreamCodec::new(&CryptoConfig {
            symmetric_algorithm: record.symmetric_algorithm,
            ..self.config.crypto.clone()
        });
        let plaintext = codec.decrypt_stream(ciphertext, secret)?;

        let stream = match self.config.receive_mode {
            ReceiveMode::Streaming => plaintext,
            ReceiveMode::Staged => self.stage_plaintext(transfer_id, plaintext).await?,
        };

        info!(transfer_id = %transfer_id, requester = %requester, "Transfer delivering");
        Ok(Delivery::new(record.id, record.file_name, stream))
    }

    /// Decrypt fully into a staging blob and stream it back out.
    async fn stage_plaintext(&self, transfer_id: &TransferId, plaintext: ByteStream) -> Result<ByteStream> {
        let staging = self
            .staging_dir
            .join(&format!("decrypted-{}", uuid::Uuid::new_v4()))?;

        if let Err(e) = write_stream(self.blobs.as_ref(), &staging, plaintext).await {
            warn!(transfer_id = %transfer_id, error = %e, "Receive failed while decrypting");
            return Err(e);
        }

        let guard = BlobGuard::new(Arc::clone(&self.blobs), staging.clone());
        match self.blobs.open_read(&staging).await {
            Ok(source) => Ok(staged_stream(source, guard)),
            Err(e) => {
                if let Err(cleanup) = guard.discard().await {
                    warn!(transfer_id = %transfer_id, error = %cleanup, "Failed to remove staged plaintext");
                }
                Err(e)
            }
        }
    }

    /// Transfers addressed to `requester`, newest first.
    pub async fn inbox(&self, requester: &UserId) -> Result<Vec<TransferSummary>> {
        let mut summaries: Vec<TransferSummary> = self
            .records
            .list_records()
            .await?
            .iter()
            .filter(|record| TransferAuthorizer::can_decrypt(requester, record))
            .map(TransferRecord::summary)
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

/// Reduce a client-supplied name to a bare file name.
fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::Validation("No file name given".to_string()));
    }
    if base.chars().any(char::is_control) {
        return Err(Error::Validation(
            "File name contains control characters".to_string(),
        ));
    }

    Ok(base.to_string())
}

/// `enc-<uuid>` plus the original extension when it is plain alphanumeric.
fn ciphertext_blob_name(file_name: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.len() <= 16 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("enc-{}.{}", id, ext)
        }
        _ => format!("enc-{}", id),
    }
}

/// Count plaintext bytes and fail once more than `max` have passed.
fn limit_size(source: ByteStream, max: u64, counter: Arc<AtomicU64>) -> ByteStream {
    Box::pin(source.map(move |chunk| {
        let chunk = chunk?;
        let total = counter.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        if total > max {
            return Err(Error::Validation(format!(
                "File exceeds the maximum size of {} bytes",
                max
            )));
        }
        Ok(chunk)
    }))
}
