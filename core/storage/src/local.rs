//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::provider::{BlobMetadata, BlobSink, BlobStore, READ_CHUNK_SIZE};
use secureshare_common::{BlobPath, ByteStream, Error, Result};

/// Local filesystem blob store.
///
/// Maps each blob path onto a file below `root`. In-progress writes live in a
/// hidden `.<name>.part` file next to their target and are renamed into place
/// once synced, so readers never observe a partial blob.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, path: &BlobPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn blob_name(path: &BlobPath) -> Result<&str> {
        path.name()
            .ok_or_else(|| Error::Validation("Blob path cannot be the root".to_string()))
    }

    fn create_metadata(path: BlobPath, fs_meta: &std::fs::Metadata) -> BlobMetadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        BlobMetadata {
            path,
            size: fs_meta.len(),
            modified,
        }
    }
}

fn not_found(path: &BlobPath, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("Blob not found: {}", path))
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn open_write(&self, path: &BlobPath) -> Result<Box<dyn BlobSink>> {
        let name = Self::blob_name(path)?;
        let target = self.to_fs_path(path);

        if fs::try_exists(&target).await? {
            return Err(Error::AlreadyExists(format!("Blob already exists: {}", path)));
        }

        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await?;

        let temp = parent.join(format!(".{}.part", name));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::AlreadyExists(format!("Blob is already being written: {}", path))
                } else {
                    Error::Io(e)
                }
            })?;

        Ok(Box::new(LocalBlobSink {
            file: Some(file),
            path: path.clone(),
            temp,
            target,
            committed: false,
        }))
    }

    async fn open_read(&self, path: &BlobPath) -> Result<ByteStream> {
        let fs_path = self.to_fs_path(path);

        let file = fs::File::open(&fs_path)
            .await
            .map_err(|e| not_found(path, e))?;
        if file.metadata().await?.is_dir() {
            return Err(Error::NotFound(format!("Blob not found: {}", path)));
        }

        let stream = ReaderStream::with_capacity(file, READ_CHUNK_SIZE)
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));
        Ok(Box::pin(stream))
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool> {
        let fs_path = self.to_fs_path(path);
        match fs::metadata(&fs_path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &BlobPath) -> Result<()> {
        let fs_path = self.to_fs_path(path);
        fs::remove_file(&fs_path)
            .await
            .map_err(|e| not_found(path, e))
    }

    async fn metadata(&self, path: &BlobPath) -> Result<BlobMetadata> {
        let fs_path = self.to_fs_path(path);
        let fs_meta = fs::metadata(&fs_path)
            .await
            .map_err(|e| not_found(path, e))?;
        if !fs_meta.is_file() {
            return Err(Error::NotFound(format!("Blob not found: {}", path)));
        }
        Ok(Self::create_metadata(path.clone(), &fs_meta))
    }

    async fn list(&self, dir: &BlobPath) -> Result<Vec<BlobMetadata>> {
        let fs_path = self.to_fs_path(dir);

        let mut entries = match fs::read_dir(&fs_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            // In-progress writes are not blobs yet.
            if name.starts_with('.') {
                continue;
            }
            let fs_meta = entry.metadata().await?;
            if !fs_meta.is_file() {
                continue;
            }
            results.push(Self::create_metadata(dir.join(&name)?, &fs_meta));
        }

        Ok(results)
    }
}

/// Flush a directory's entries to disk so a rename into it survives a crash.
///
/// A no-op on platforms that cannot open directories as files.
pub async fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    fs::File::open(dir).await?.sync_all().await?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Sink writing to a hidden temp file, renamed into place on finish.
struct LocalBlobSink {
    file: Option<fs::File>,
    path: BlobPath,
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

#[async_trait]
impl BlobSink for LocalBlobSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Storage("Sink is closed".to_string()))?;
        file.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<BlobMetadata> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::Storage("Sink is closed".to_string()))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if fs::try_exists(&self.target).await? {
            return Err(Error::AlreadyExists(format!(
                "Blob already exists: {}",
                self.path
            )));
        }
        fs::rename(&self.temp, &self.target).await?;
        self.committed = true;
        if let Some(parent) = self.target.parent() {
            sync_dir(parent).await?;
        }

        let fs_meta = fs::metadata(&self.target).await?;
        Ok(LocalBlobStore::create_metadata(self.path.clone(), &fs_meta))
    }
}

impl Drop for LocalBlobSink {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.temp) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path, error = %e, "failed to remove partial blob");
                }
            }
        }
    }
}
