//! Blob store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use secureshare_common::{BlobPath, ByteStream, Result};

/// Chunk size used by backends when streaming a blob back out.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Location of the blob.
    pub path: BlobPath,
    /// Size in bytes.
    pub size: u64,
    /// Time the blob was committed.
    pub modified: DateTime<Utc>,
}

/// Write handle for a blob that does not exist yet.
///
/// Nothing written through a sink is visible until [`finish`](Self::finish)
/// returns. A sink dropped before that discards what it wrote.
#[async_trait]
pub trait BlobSink: Send {
    /// Append a chunk.
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Durably commit the blob and make it visible.
    ///
    /// # Errors
    /// - A blob appeared at the same path while writing
    /// - I/O errors
    async fn finish(self: Box<Self>) -> Result<BlobMetadata>;
}

/// Storage backend for ciphertext and staged plaintext.
///
/// Blobs are immutable once committed. Directories are implicit: writing
/// `/uploads/x` does not require `/uploads` to be created first.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the backend name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Start writing a new blob.
    ///
    /// # Errors
    /// - `AlreadyExists` if a blob is already committed at `path`
    /// - I/O errors
    async fn open_write(&self, path: &BlobPath) -> Result<Box<dyn BlobSink>>;

    /// Stream a blob's content in bounded chunks.
    ///
    /// # Errors
    /// - `NotFound` if no blob is committed at `path`
    async fn open_read(&self, path: &BlobPath) -> Result<ByteStream>;

    /// Check if a blob exists.
    async fn exists(&self, path: &BlobPath) -> Result<bool>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - `NotFound` if no blob is committed at `path`
    async fn delete(&self, path: &BlobPath) -> Result<()>;

    /// Get metadata for a blob.
    async fn metadata(&self, path: &BlobPath) -> Result<BlobMetadata>;

    /// List the blobs directly below `dir`. A directory that was never
    /// written to is empty, not an error.
    async fn list(&self, dir: &BlobPath) -> Result<Vec<BlobMetadata>>;
}

/// Pipe `stream` into a new blob at `path`.
///
/// The blob is committed only if the stream ends cleanly. On the first error
/// from the stream or the sink, the sink is dropped (discarding its partial
/// content) and the error is returned.
pub async fn write_stream(
    store: &dyn BlobStore,
    path: &BlobPath,
    mut stream: ByteStream,
) -> Result<BlobMetadata> {
    let mut sink = store.open_write(path).await?;

    while let Some(chunk) = stream.next().await {
        sink.write(&chunk?).await?;
    }

    sink.finish().await
}

/// Store `data` as a new blob at `path`.
pub async fn write_bytes(store: &dyn BlobStore, path: &BlobPath, data: &[u8]) -> Result<BlobMetadata> {
    let mut sink = store.open_write(path).await?;
    sink.write(data).await?;
    sink.finish().await
}
