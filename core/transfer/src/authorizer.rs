//! Decryption authorization.

use subtle::ConstantTimeEq;

use crate::record::TransferRecord;
use secureshare_common::{Error, Result, UserId};

/// Decides who may decrypt a stored transfer.
///
/// Only the recorded receiver may. The sender is denied like anyone else.
/// The orchestrator runs this check before any private key is fetched.
pub struct TransferAuthorizer;

impl TransferAuthorizer {
    /// Whether `requester` is the receiver of `record`.
    ///
    /// Compares in constant time over the identifier bytes.
    pub fn can_decrypt(requester: &UserId, record: &TransferRecord) -> bool {
        requester
            .as_str()
            .as_bytes()
            .ct_eq(record.receiver_id.as_str().as_bytes())
            .into()
    }

    /// [`can_decrypt`](Self::can_decrypt) as a result.
    ///
    /// # Errors
    /// - `Unauthorized` if `requester` is not the receiver
    pub fn authorize(requester: &UserId, record: &TransferRecord) -> Result<()> {
        if Self::can_decrypt(requester, record) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} is not the receiver of transfer {}",
                requester, record.id
            )))
        }
    }
}
