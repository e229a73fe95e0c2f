//! Common utilities and types shared across SecureShare crates.
//!
//! This module provides the error taxonomy every crate propagates, plus the
//! identifiers and path types used at the boundaries between the transfer
//! pipeline and its storage collaborators.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{BlobPath, ByteStream, SensitiveBytes, TransferId, UserId};
