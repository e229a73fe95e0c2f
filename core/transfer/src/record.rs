//! Durable transfer metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use secureshare_common::{BlobPath, TransferId, UserId};
use secureshare_crypto::{AsymmetricScheme, SymmetricAlgorithm};

/// One completed file transfer.
///
/// Created only after the ciphertext at `ciphertext_location` is fully and
/// durably written, and never modified afterwards. `wrapped_secret` unwraps
/// under the receiver's private key to exactly the secret that encrypted
/// that ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    /// Original (sanitized) name of the sent file.
    pub file_name: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Blob path of the ciphertext, recorded verbatim.
    pub ciphertext_location: BlobPath,
    /// Base64 of the RSA-OAEP-wrapped `key || nonce`.
    pub wrapped_secret: String,
    #[serde(default)]
    pub symmetric_algorithm: SymmetricAlgorithm,
    #[serde(default)]
    pub asymmetric_scheme: AsymmetricScheme,
    pub ciphertext_size: u64,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Inbox view of this record, without key material or locations.
    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            sender_id: self.sender_id.clone(),
            ciphertext_size: self.ciphertext_size,
            created_at: self.created_at,
        }
    }
}

/// A transfer as listed in a receiver's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub id: TransferId,
    pub file_name: String,
    pub sender_id: UserId,
    pub ciphertext_size: u64,
    pub created_at: DateTime<Utc>,
}
