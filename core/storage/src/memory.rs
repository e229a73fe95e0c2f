//! In-memory blob store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::provider::{BlobMetadata, BlobSink, BlobStore, READ_CHUNK_SIZE};
use secureshare_common::{BlobPath, ByteStream, Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    data: Arc<Vec<u8>>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<BlobPath, Entry>,
    /// Bytes accepted by sinks over the store's lifetime.
    written: u64,
    quota: Option<u64>,
}

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same storage.
///
/// A store built with [`with_quota`](Self::with_quota) fails every write
/// past the quota with an I/O error, which lets tests inject a storage
/// failure at a chosen point of a transfer.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that accepts at most `bytes` of written data in total.
    pub fn with_quota(bytes: u64) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            inner.quota = Some(bytes);
        }
        store
    }

    /// Number of committed blobs.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.blobs.len()).unwrap_or(0)
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn metadata_for(path: &BlobPath, entry: &Entry) -> BlobMetadata {
        BlobMetadata {
            path: path.clone(),
            size: entry.data.len() as u64,
            modified: entry.modified,
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open_write(&self, path: &BlobPath) -> Result<Box<dyn BlobSink>> {
        if path.is_root() {
            return Err(Error::Validation("Blob path cannot be the root".to_string()));
        }
        if self.lock()?.blobs.contains_key(path) {
            return Err(Error::AlreadyExists(format!("Blob already exists: {}", path)));
        }

        Ok(Box::new(MemoryBlobSink {
            store: self.clone(),
            path: path.clone(),
            buffer: Vec::new(),
        }))
    }

    async fn open_read(&self, path: &BlobPath) -> Result<ByteStream> {
        let data = self
            .lock()?
            .blobs
            .get(path)
            .map(|entry| Arc::clone(&entry.data))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))?;

        let chunks: Vec<Result<Vec<u8>>> = data
            .chunks(READ_CHUNK_SIZE)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool> {
        Ok(self.lock()?.blobs.contains_key(path))
    }

    async fn delete(&self, path: &BlobPath) -> Result<()> {
        self.lock()?
            .blobs
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }

    async fn metadata(&self, path: &BlobPath) -> Result<BlobMetadata> {
        let inner = self.lock()?;
        inner
            .blobs
            .get(path)
            .map(|entry| Self::metadata_for(path, entry))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }

    async fn list(&self, dir: &BlobPath) -> Result<Vec<BlobMetadata>> {
        let inner = self.lock()?;
        let depth = dir.components().len() + 1;

        Ok(inner
            .blobs
            .iter()
            .filter(|(path, _)| path.starts_with(dir) && path.components().len() == depth)
            .map(|(path, entry)| Self::metadata_for(path, entry))
            .collect())
    }
}

/// Buffers a blob and inserts it on finish.
struct MemoryBlobSink {
    store: MemoryBlobStore,
    path: BlobPath,
    buffer: Vec<u8>,
}

#[async_trait]
impl BlobSink for MemoryBlobSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let mut inner = self.store.lock()?;
        let written = inner.written + chunk.len() as u64;
        if let Some(quota) = inner.quota {
            if written > quota {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "memory store quota exceeded",
                )));
            }
        }
        inner.written = written;
        drop(inner);

        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<BlobMetadata> {
        let MemoryBlobSink {
            store,
            path,
            buffer,
        } = *self;

        let mut inner = store.lock()?;
        if inner.blobs.contains_key(&path) {
            return Err(Error::AlreadyExists(format!("Blob already exists: {}", path)));
        }

        let entry = Entry {
            data: Arc::new(buffer),
            modified: Utc::now(),
        };
        let metadata = MemoryBlobStore::metadata_for(&path, &entry);
        inner.blobs.insert(path, entry);
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::write_bytes;
    use futures::StreamExt;

    async fn read_all(store: &MemoryBlobStore, path: &BlobPath) -> Vec<u8> {
        let mut stream = store.open_read(path).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend(chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_write_read() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::parse("/test.txt").unwrap();

        write_bytes(&store, &path, b"Hello, World!").await.unwrap();
        assert_eq!(read_all(&store, &path).await, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_blob_invisible_until_finish() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::parse("/uploads/a").unwrap();

        let mut sink = store.open_write(&path).await.unwrap();
        sink.write(&[1, 2, 3]).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());

        sink.finish().await.unwrap();
        assert!(store.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::parse("/test.txt").unwrap();

        write_bytes(&store, &path, &[1, 2, 3]).await.unwrap();
        store.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
        assert!(matches!(store.delete(&path).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let store = MemoryBlobStore::new();

        write_bytes(&store, &BlobPath::parse("/dir/file1.txt").unwrap(), &[1]).await.unwrap();
        write_bytes(&store, &BlobPath::parse("/dir/file2.txt").unwrap(), &[2]).await.unwrap();
        write_bytes(&store, &BlobPath::parse("/dir/sub/file3.txt").unwrap(), &[3]).await.unwrap();
        write_bytes(&store, &BlobPath::parse("/other.txt").unwrap(), &[4]).await.unwrap();

        let contents = store.list(&BlobPath::parse("/dir").unwrap()).await.unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_quota_fails_writes() {
        let store = MemoryBlobStore::with_quota(10);
        let path = BlobPath::parse("/a").unwrap();

        let mut sink = store.open_write(&path).await.unwrap();
        sink.write(&[0u8; 8]).await.unwrap();
        let result = sink.write(&[0u8; 8]).await;
        assert!(matches!(result, Err(Error::Io(_))));
        drop(sink);

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let store = MemoryBlobStore::new();
        let clone = store.clone();
        let path = BlobPath::parse("/shared").unwrap();

        write_bytes(&store, &path, &[9]).await.unwrap();
        assert!(clone.exists(&path).await.unwrap());
        assert_eq!(clone.len(), 1);
    }
}
