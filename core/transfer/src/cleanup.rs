//! Scoped removal of blobs that must not outlive an operation.

use std::sync::Arc;
use tracing::{debug, warn};

use secureshare_common::{BlobPath, Error, Result};
use secureshare_storage::BlobStore;

/// Deletes a blob when dropped unless [`disarm`](Self::disarm)ed.
///
/// Covers plaintext uploads awaiting a staged send and decrypted plaintext
/// that is being delivered. If the owning future is cancelled the guard
/// still runs: deletion is spawned onto the current Tokio runtime.
pub struct BlobGuard {
    store: Arc<dyn BlobStore>,
    path: Option<BlobPath>,
}

impl BlobGuard {
    /// Guard the blob at `path`.
    pub fn new(store: Arc<dyn BlobStore>, path: BlobPath) -> Self {
        Self {
            store,
            path: Some(path),
        }
    }

    /// Path of the guarded blob, if still armed.
    pub fn path(&self) -> Option<&BlobPath> {
        self.path.as_ref()
    }

    /// Keep the blob.
    pub fn disarm(mut self) -> Option<BlobPath> {
        self.path.take()
    }

    /// Delete the blob now. A blob that is already gone counts as deleted.
    pub async fn discard(mut self) -> Result<()> {
        match self.path.take() {
            Some(path) => delete_blob(self.store.as_ref(), &path).await,
            None => Ok(()),
        }
    }
}

async fn delete_blob(store: &dyn BlobStore, path: &BlobPath) -> Result<()> {
    match store.delete(path).await {
        Ok(()) | Err(Error::NotFound(_)) => {
            debug!(path = %path, "Blob removed");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

impl Drop for BlobGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = delete_blob(store.as_ref(), &path).await {
                        warn!(path = %path, error = %e, "Failed to remove abandoned blob");
                    }
                });
            }
            Err(_) => {
                warn!(path = %path, "No runtime to remove abandoned blob");
            }
        }
    }
}
