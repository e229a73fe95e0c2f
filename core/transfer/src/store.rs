//! Transfer record persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::record::TransferRecord;
use secureshare_common::{Error, Result, TransferId};
use secureshare_storage::sync_dir;

/// Durable store of transfer records.
///
/// Records are append-only: they are created once and never updated.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Postconditions
    /// - A subsequent `get_record(id)` from any task returns the record
    ///
    /// # Errors
    /// - `AlreadyExists` if a record with the same id exists
    async fn create_record(&self, record: &TransferRecord) -> Result<TransferId>;

    /// Load a record by id.
    ///
    /// # Errors
    /// - `NotFound` for unknown ids
    async fn get_record(&self, id: &TransferId) -> Result<TransferRecord>;

    /// All records, in no particular order.
    async fn list_records(&self) -> Result<Vec<TransferRecord>>;
}

/// In-memory record store for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<TransferId, TransferRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_record(&self, record: &TransferRecord) -> Result<TransferId> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::AlreadyExists(format!(
                "Transfer record already exists: {}",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record.id.clone())
    }

    async fn get_record(&self, id: &TransferId) -> Result<TransferRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Transfer not found: {}", id)))
    }

    async fn list_records(&self) -> Result<Vec<TransferRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// Record store keeping one `<id>.json` file per record in a directory.
///
/// Each record is written to a hidden temp file, synced and renamed into
/// place, so a record file is either absent or complete.
pub struct LocalRecordStore {
    dir: PathBuf,
}

impl LocalRecordStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    fn record_path(&self, id: &TransferId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn create_record(&self, record: &TransferRecord) -> Result<TransferId> {
        if !record.id.is_path_safe() {
            return Err(Error::Validation(format!(
                "Transfer id is not storable: {}",
                record.id
            )));
        }

        let target = self.record_path(&record.id);
        if fs::try_exists(&target).await? {
            return Err(Error::AlreadyExists(format!(
                "Transfer record already exists: {}",
                record.id
            )));
        }

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let temp = self.dir.join(format!(".{}.json.tmp", record.id.as_str()));
        let written = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp)
                .await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        // A record that is visible but not durable must not outlive the error.
        if let Err(e) = sync_dir(&self.dir).await {
            let _ = fs::remove_file(&target).await;
            return Err(e);
        }

        Ok(record.id.clone())
    }

    async fn get_record(&self, id: &TransferId) -> Result<TransferRecord> {
        // Ids that could not have been stored are unknown, not invalid.
        if !id.is_path_safe() {
            return Err(Error::NotFound(format!("Transfer not found: {}", id)));
        }

        let content = match fs::read(self.record_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Transfer not found: {}", id)));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&content).map_err(|e| Error::Serialization(e.to_string()))
    }

    async fn list_records(&self) -> Result<Vec<TransferRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            let content = fs::read(entry.path()).await?;
            match serde_json::from_slice(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "skipping unreadable transfer record");
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_create_get() {
        let store = MemoryRecordStore::new();
        let record = sample_record("bob");

        let id = store.create_record(&record).await.unwrap();
        assert_eq!(store.get_record(&id).await.unwrap(), record);
        assert!(matches!(
            store.create_record(&record).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get_record(&TransferId::from_string("unknown-id")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_create_get_list() {
        let temp = TempDir::new().unwrap();
        let store = LocalRecordStore::new(temp.path()).unwrap();
        let first = sample_record("bob");
        let second = sample_record("carol");

        store.create_record(&first).await.unwrap();
        store.create_record(&second).await.unwrap();

        assert_eq!(store.get_record(&first.id).await.unwrap(), first);
        assert_eq!(store.list_records().await.unwrap().len(), 2);

        // Only the record files remain, no temp files.
        let files = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_local_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let record = sample_record("bob");

        LocalRecordStore::new(temp.path())
            .unwrap()
            .create_record(&record)
            .await
            .unwrap();

        let reopened = LocalRecordStore::new(temp.path()).unwrap();
        assert_eq!(reopened.get_record(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_local_duplicate_and_unknown() {
        let temp = TempDir::new().unwrap();
        let store = LocalRecordStore::new(temp.path()).unwrap();
        let record = sample_record("bob");

        store.create_record(&record).await.unwrap();
        assert!(matches!(
            store.create_record(&record).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get_record(&TransferId::from_string("unknown-id")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.get_record(&TransferId::from_string("../../etc/passwd")).await,
            Err(Error::NotFound(_))
        ));
    }
}
