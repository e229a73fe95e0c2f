//! Blob storage abstraction for SecureShare.
//!
//! Ciphertext and staged plaintext live in a [`BlobStore`]: a flat namespace
//! of write-once blobs addressed by [`BlobPath`](secureshare_common::BlobPath).
//! Backends are resolved by name through a [`BlobStoreRegistry`].
//!
//! # Design Principles
//! - Write-once: blobs are created through a sink and never mutated in place
//! - Atomic visibility: a blob appears only once its sink has finished
//! - Streaming: reads yield bounded chunks, writes accept them one at a time

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use local::{sync_dir, LocalBlobStore};
pub use memory::MemoryBlobStore;
pub use provider::{write_bytes, write_stream, BlobMetadata, BlobSink, BlobStore, READ_CHUNK_SIZE};
pub use registry::{create_default_registry, BlobStoreFactory, BlobStoreRegistry};
