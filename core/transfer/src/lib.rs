//! Envelope-encrypted file transfers between registered users.
//!
//! A send encrypts the file under a fresh per-transfer secret, wraps that
//! secret under the recipient's public key and persists a [`TransferRecord`]
//! pointing at the ciphertext. A receive checks that the requester is the
//! recorded receiver, unwraps the secret with the receiver's private key and
//! streams the plaintext back.
//!
//! # Components
//! - [`TransferOrchestrator`]: send, receive and inbox
//! - [`TransferAuthorizer`]: who may decrypt a record
//! - [`RecordStore`] / [`UserDirectory`]: persistence collaborators, with
//!   in-memory and local-disk implementations

pub mod authorizer;
pub mod cleanup;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod orchestrator;
pub mod record;
pub mod store;

pub use authorizer::TransferAuthorizer;
pub use cleanup::BlobGuard;
pub use config::{ReceiveMode, StorageConfig, TransferConfig};
pub use delivery::Delivery;
pub use directory::{LocalKeyDirectory, MemoryUserDirectory, UserDirectory};
pub use orchestrator::{TransferOrchestrator, TransferReceipt};
pub use record::{TransferRecord, TransferSummary};
pub use store::{LocalRecordStore, MemoryRecordStore, RecordStore};
