//! End-to-end send/receive tests against in-memory and on-disk stores.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tokio::sync::Notify;

use secureshare_common::{BlobPath, ByteStream, Error, ErrorKind, Result, TransferId, UserId};
use secureshare_crypto::{
    CryptoConfig, KdfParams, KeyPair, PrivateKey, PublicKey, SymmetricAlgorithm,
};
use secureshare_storage::{write_bytes, BlobStore, LocalBlobStore, MemoryBlobStore};
use secureshare_transfer::{
    LocalKeyDirectory, LocalRecordStore, MemoryRecordStore, MemoryUserDirectory, ReceiveMode,
    RecordStore, TransferConfig, TransferOrchestrator, TransferRecord, UserDirectory,
};

const USERS: usize = 6;

/// RSA keypairs are slow to generate, so every test shares one set.
fn keypair(index: usize) -> KeyPair {
    static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| {
        let config = CryptoConfig::default();
        (0..USERS).map(|_| KeyPair::generate(&config).unwrap()).collect()
    })[index]
        .clone()
}

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn source(data: &[u8], chunk: usize) -> ByteStream {
    let chunks: Vec<Result<Vec<u8>>> = data.chunks(chunk).map(|c| Ok(c.to_vec())).collect();
    Box::pin(stream::iter(chunks))
}

fn pseudo_random(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

async fn registered_users(config: &TransferConfig) -> MemoryUserDirectory {
    let users = MemoryUserDirectory::new(config.crypto.clone());
    for (i, name) in ["sender", "receiver", "mallory"].iter().enumerate() {
        users.insert(user(name), keypair(i)).await.unwrap();
    }
    users
}

struct Harness {
    orchestrator: Arc<TransferOrchestrator>,
    blobs: MemoryBlobStore,
    records: Arc<MemoryRecordStore>,
    users: Arc<MemoryUserDirectory>,
}

impl Harness {
    async fn new(config: TransferConfig) -> Self {
        Self::with_store(config, MemoryBlobStore::new()).await
    }

    async fn with_store(config: TransferConfig, blobs: MemoryBlobStore) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let users = Arc::new(registered_users(&config).await);

        let orchestrator = TransferOrchestrator::new(
            config,
            Arc::new(blobs.clone()),
            records.clone(),
            users.clone(),
        )
        .unwrap();

        Self {
            orchestrator: Arc::new(orchestrator),
            blobs,
            records,
            users,
        }
    }

    async fn staged_plaintext(&self) -> usize {
        self.blobs
            .list(&BlobPath::parse("/downloads").unwrap())
            .await
            .unwrap()
            .len()
    }
}

#[tokio::test]
async fn test_ten_megabyte_round_trip_and_sender_denied() {
    let harness = Harness::new(TransferConfig::default()).await;
    let data = pseudo_random(10 * 1024 * 1024);

    let receipt = harness
        .orchestrator
        .send(source(&data, 64 * 1024), "report.pdf", &user("sender"), &user("receiver"))
        .await
        .unwrap();
    assert_eq!(receipt.file_name, "report.pdf");
    assert_eq!(receipt.plaintext_size, data.len() as u64);
    assert_eq!(receipt.ciphertext_size, (data.len() as u64 / 16 + 1) * 16);

    let delivery = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap();
    assert_eq!(delivery.file_name(), "report.pdf");
    assert!(delivery.into_bytes().await.unwrap() == data);

    let denied = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("sender"))
        .await;
    assert!(matches!(denied, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn test_unknown_transfer_is_not_found() {
    let harness = Harness::new(TransferConfig::default()).await;

    let result = harness
        .orchestrator
        .receive(&TransferId::from_string("unknown-id"), &user("receiver"))
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_unknown_recipient_is_not_found() {
    let harness = Harness::new(TransferConfig::default()).await;

    let result = harness
        .orchestrator
        .send(source(b"hi", 2), "a.txt", &user("sender"), &user("nobody"))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(harness.blobs.is_empty());
}

#[tokio::test]
async fn test_same_file_twice_uses_fresh_secrets() {
    let harness = Harness::new(TransferConfig::default()).await;
    let data = pseudo_random(4096);

    let mut records = Vec::new();
    for _ in 0..2 {
        let receipt = harness
            .orchestrator
            .send(source(&data, 1024), "same.bin", &user("sender"), &user("receiver"))
            .await
            .unwrap();
        records.push(harness.records.get_record(&receipt.transfer_id).await.unwrap());
    }

    assert_ne!(records[0].wrapped_secret, records[1].wrapped_secret);
    assert_ne!(records[0].ciphertext_location, records[1].ciphertext_location);

    let mut ciphertexts = Vec::new();
    for record in &records {
        let mut stream = harness.blobs.open_read(&record.ciphertext_location).await.unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend(chunk.unwrap());
        }
        ciphertexts.push(bytes);
    }
    assert_ne!(ciphertexts[0], ciphertexts[1]);
}

#[tokio::test]
async fn test_wrong_private_key_is_a_crypto_error() {
    let harness = Harness::new(TransferConfig::default()).await;
    let receipt = harness
        .orchestrator
        .send(source(b"for the receiver only", 8), "note.txt", &user("sender"), &user("receiver"))
        .await
        .unwrap();

    // The directory now hands out a key the envelope was not wrapped for.
    harness.users.replace(user("receiver"), keypair(3)).await;

    let err = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_eq!(err.public_message(), "decryption failed");
    assert_eq!(harness.staged_plaintext().await, 0);
}

#[tokio::test]
async fn test_injected_io_failure_leaves_nothing() {
    let harness = Harness::with_store(TransferConfig::default(), MemoryBlobStore::with_quota(4096)).await;
    let data = pseudo_random(64 * 1024);

    let result = harness
        .orchestrator
        .send(source(&data, 1024), "big.bin", &user("sender"), &user("receiver"))
        .await;

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(harness.blobs.is_empty());
    assert!(harness.records.is_empty().await);
}

#[tokio::test]
async fn test_source_failure_leaves_nothing() {
    let harness = Harness::new(TransferConfig::default()).await;
    let failing: ByteStream = Box::pin(stream::iter(vec![
        Ok(vec![1u8; 1000]),
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client disconnected",
        ))),
    ]));

    let result = harness
        .orchestrator
        .send(failing, "upload.bin", &user("sender"), &user("receiver"))
        .await;

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(harness.blobs.is_empty());
    assert!(harness.records.is_empty().await);
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let mut config = TransferConfig::default();
    config.max_file_size = 1000;
    let harness = Harness::new(config).await;

    let result = harness
        .orchestrator
        .send(source(&[0u8; 1001], 100), "big.bin", &user("sender"), &user("receiver"))
        .await;

    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(harness.blobs.is_empty());
    assert!(harness.records.is_empty().await);
}

#[tokio::test]
async fn test_empty_file_round_trip() {
    let harness = Harness::new(TransferConfig::default()).await;

    let receipt = harness
        .orchestrator
        .send(source(&[], 1), "empty.txt", &user("sender"), &user("receiver"))
        .await
        .unwrap();
    assert_eq!(receipt.plaintext_size, 0);
    assert_eq!(receipt.ciphertext_size, 16);

    let delivery = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap();
    assert!(delivery.into_bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_plaintext_remains_after_receive() {
    let harness = Harness::new(TransferConfig::default()).await;
    let data = pseudo_random(300 * 1024);

    let receipt = harness
        .orchestrator
        .send(source(&data, 4096), "photo.jpg", &user("sender"), &user("receiver"))
        .await
        .unwrap();

    let delivery = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap();
    assert_eq!(harness.staged_plaintext().await, 1);

    let mut out = Vec::new();
    let written = delivery.write_to(&mut out).await.unwrap();
    assert_eq!(written, data.len() as u64);
    assert!(out == data);

    assert_eq!(harness.staged_plaintext().await, 0);
    assert_eq!(harness.blobs.len(), 1);
}

#[tokio::test]
async fn test_cancelled_receive_removes_plaintext() {
    let harness = Harness::new(TransferConfig::default()).await;
    let data = pseudo_random(512 * 1024);

    let receipt = harness
        .orchestrator
        .send(source(&data, 4096), "video.mp4", &user("sender"), &user("receiver"))
        .await
        .unwrap();

    let mut stream = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap()
        .into_stream();
    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    for _ in 0..100 {
        if harness.staged_plaintext().await == 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("staged plaintext survived a cancelled receive");
}

#[tokio::test]
async fn test_streaming_mode_with_ctr() {
    let mut config = TransferConfig::default();
    config.receive_mode = ReceiveMode::Streaming;
    config.crypto.symmetric_algorithm = SymmetricAlgorithm::Aes256Ctr;
    let harness = Harness::new(config).await;
    let data = pseudo_random(200_000);

    let receipt = harness
        .orchestrator
        .send(source(&data, 3000), "data.csv", &user("sender"), &user("receiver"))
        .await
        .unwrap();
    assert_eq!(receipt.ciphertext_size, data.len() as u64);

    let record = harness.records.get_record(&receipt.transfer_id).await.unwrap();
    assert_eq!(record.symmetric_algorithm, SymmetricAlgorithm::Aes256Ctr);

    let delivery = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap();
    assert!(delivery.into_bytes().await.unwrap() == data);
    assert_eq!(harness.staged_plaintext().await, 0);
}

#[tokio::test]
async fn test_missing_ciphertext_is_storage_error() {
    let harness = Harness::new(TransferConfig::default()).await;
    let receipt = harness
        .orchestrator
        .send(source(b"soon gone", 4), "gone.txt", &user("sender"), &user("receiver"))
        .await
        .unwrap();

    let record = harness.records.get_record(&receipt.transfer_id).await.unwrap();
    harness.blobs.delete(&record.ciphertext_location).await.unwrap();

    let result = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await;
    assert!(matches!(result, Err(Error::Storage(_))));
}

#[tokio::test]
async fn test_send_staged_removes_upload() {
    let harness = Harness::new(TransferConfig::default()).await;
    let upload = BlobPath::parse("/downloads/upload-1").unwrap();
    write_bytes(&harness.blobs, &upload, b"multipart body").await.unwrap();

    let receipt = harness
        .orchestrator
        .send_staged(&upload, "form.txt", &user("sender"), &user("receiver"))
        .await
        .unwrap();
    assert!(!harness.blobs.exists(&upload).await.unwrap());

    let delivery = harness
        .orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap();
    assert_eq!(delivery.into_bytes().await.unwrap(), b"multipart body");

    let missing = harness
        .orchestrator
        .send_staged(&upload, "form.txt", &user("sender"), &user("receiver"))
        .await;
    assert!(matches!(missing, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_inbox_lists_only_own_transfers() {
    let harness = Harness::new(TransferConfig::default()).await;

    for (name, to) in [("a.txt", "receiver"), ("b.txt", "mallory"), ("c.txt", "receiver")] {
        harness
            .orchestrator
            .send(source(b"x", 1), name, &user("sender"), &user(to))
            .await
            .unwrap();
    }

    let inbox = harness.orchestrator.inbox(&user("receiver")).await.unwrap();
    let mut names: Vec<&str> = inbox.iter().map(|s| s.file_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "c.txt"]);
    assert!(harness.orchestrator.inbox(&user("sender")).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_are_independent() {
    let harness = Harness::new(TransferConfig::default()).await;

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let orchestrator = Arc::clone(&harness.orchestrator);
        handles.push(tokio::spawn(async move {
            let data: Vec<u8> = pseudo_random(50_000 + i as usize * 1000)
                .into_iter()
                .map(|b| b ^ i)
                .collect();
            let receipt = orchestrator
                .send(source(&data, 4096), &format!("file-{}.bin", i), &user("sender"), &user("receiver"))
                .await
                .unwrap();
            let received = orchestrator
                .receive(&receipt.transfer_id, &user("receiver"))
                .await
                .unwrap()
                .into_bytes()
                .await
                .unwrap();
            assert!(received == data);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(harness.records.len().await, 8);
    assert_eq!(harness.staged_plaintext().await, 0);
}

/// Record store that refuses every write.
struct FailingRecordStore;

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn create_record(&self, _record: &TransferRecord) -> Result<TransferId> {
        Err(Error::Storage("record store unavailable".to_string()))
    }

    async fn get_record(&self, id: &TransferId) -> Result<TransferRecord> {
        Err(Error::NotFound(format!("Transfer not found: {}", id)))
    }

    async fn list_records(&self) -> Result<Vec<TransferRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_record_failure_removes_ciphertext() {
    let blobs = MemoryBlobStore::new();
    let users = Arc::new(MemoryUserDirectory::new(CryptoConfig::default()));
    users.insert(user("sender"), keypair(0)).await.unwrap();
    users.insert(user("receiver"), keypair(1)).await.unwrap();

    let orchestrator = TransferOrchestrator::new(
        TransferConfig::default(),
        Arc::new(blobs.clone()),
        Arc::new(FailingRecordStore),
        users,
    )
    .unwrap();

    let result = orchestrator
        .send(source(b"never recorded", 4), "x.txt", &user("sender"), &user("receiver"))
        .await;
    assert!(matches!(result, Err(Error::Storage(_))));
    assert!(blobs.is_empty());
}

#[tokio::test]
async fn test_round_trip_on_disk() {
    let temp = TempDir::new().unwrap();
    let config = TransferConfig::default();

    let blobs = Arc::new(LocalBlobStore::new(temp.path().join("blobs")).unwrap());
    let records = Arc::new(LocalRecordStore::new(temp.path().join("records")).unwrap());
    let users = Arc::new(
        LocalKeyDirectory::new(temp.path().join("keys"), config.crypto.clone())
            .unwrap()
            .with_passphrase("correct horse", KdfParams::moderate()),
    );
    users.register(&user("sender")).await.unwrap();
    users.register(&user("receiver")).await.unwrap();

    let orchestrator =
        TransferOrchestrator::new(config, blobs.clone(), records.clone(), users).unwrap();
    let data = pseudo_random(700_000);

    let receipt = orchestrator
        .send(source(&data, 65_536), "archive.tar.gz", &user("sender"), &user("receiver"))
        .await
        .unwrap();

    let stored = records.get_record(&receipt.transfer_id).await.unwrap();
    assert!(stored.ciphertext_location.to_string_path().starts_with("/uploads/enc-"));
    assert!(stored.ciphertext_location.to_string_path().ends_with(".gz"));

    let received = orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap()
        .into_bytes()
        .await
        .unwrap();
    assert!(received == data);

    let downloads = blobs.list(&BlobPath::parse("/downloads").unwrap()).await.unwrap();
    assert!(downloads.is_empty());
    let leftovers = std::fs::read_dir(temp.path().join("blobs").join("downloads"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

/// Record store that commits a record but never acknowledges the write.
struct UnacknowledgedRecordStore {
    inner: Arc<MemoryRecordStore>,
    committed: Arc<Notify>,
}

#[async_trait]
impl RecordStore for UnacknowledgedRecordStore {
    async fn create_record(&self, record: &TransferRecord) -> Result<TransferId> {
        self.inner.create_record(record).await?;
        self.committed.notify_one();
        std::future::pending().await
    }

    async fn get_record(&self, id: &TransferId) -> Result<TransferRecord> {
        self.inner.get_record(id).await
    }

    async fn list_records(&self) -> Result<Vec<TransferRecord>> {
        self.inner.list_records().await
    }
}

struct UnacknowledgedHarness {
    orchestrator: TransferOrchestrator,
    blobs: MemoryBlobStore,
    records: Arc<MemoryRecordStore>,
    committed: Arc<Notify>,
}

impl UnacknowledgedHarness {
    async fn new() -> Self {
        let config = TransferConfig::default();
        let blobs = MemoryBlobStore::new();
        let records = Arc::new(MemoryRecordStore::new());
        let committed = Arc::new(Notify::new());
        let users = Arc::new(registered_users(&config).await);

        let store = UnacknowledgedRecordStore {
            inner: records.clone(),
            committed: committed.clone(),
        };
        let orchestrator =
            TransferOrchestrator::new(config, Arc::new(blobs.clone()), Arc::new(store), users)
                .unwrap();

        Self {
            orchestrator,
            blobs,
            records,
            committed,
        }
    }

    /// Give tasks spawned by dropped guards a chance to run.
    async fn settle() {
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn test_cancel_after_record_commit_keeps_ciphertext() {
    let harness = UnacknowledgedHarness::new().await;

    let sender = user("sender");
    let receiver = user("receiver");
    let send = harness.orchestrator.send(
        source(b"committed before acknowledged", 4),
        "late.txt",
        &sender,
        &receiver,
    );
    tokio::select! {
        _ = send => panic!("send finished without an acknowledged record"),
        _ = harness.committed.notified() => {}
    }
    UnacknowledgedHarness::settle().await;

    let stored = harness.records.list_records().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(harness.blobs.exists(&stored[0].ciphertext_location).await.unwrap());

    let received = harness
        .orchestrator
        .receive(&stored[0].id, &user("receiver"))
        .await
        .unwrap()
        .into_bytes()
        .await
        .unwrap();
    assert_eq!(received, b"committed before acknowledged");
}

#[tokio::test]
async fn test_cancelled_send_staged_removes_upload() {
    let harness = UnacknowledgedHarness::new().await;
    let upload = BlobPath::parse("/downloads/upload-1").unwrap();
    write_bytes(&harness.blobs, &upload, b"multipart body").await.unwrap();

    let sender = user("sender");
    let receiver = user("receiver");
    let send = harness.orchestrator.send_staged(
        &upload,
        "form.txt",
        &sender,
        &receiver,
    );
    tokio::select! {
        _ = send => panic!("send finished without an acknowledged record"),
        _ = harness.committed.notified() => {}
    }

    for _ in 0..100 {
        if !harness.blobs.exists(&upload).await.unwrap() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(!harness.blobs.exists(&upload).await.unwrap());

    let stored = harness.records.list_records().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(harness.blobs.exists(&stored[0].ciphertext_location).await.unwrap());
}

/// Directory that counts private key lookups.
struct CountingDirectory {
    inner: MemoryUserDirectory,
    private_key_reads: AtomicUsize,
}

#[async_trait]
impl UserDirectory for CountingDirectory {
    async fn get_public_key(&self, user: &UserId) -> Result<PublicKey> {
        self.inner.get_public_key(user).await
    }

    async fn get_private_key(&self, user: &UserId) -> Result<PrivateKey> {
        self.private_key_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_private_key(user).await
    }
}

#[tokio::test]
async fn test_private_key_fetched_only_after_authorization() {
    let config = TransferConfig::default();
    let users = Arc::new(CountingDirectory {
        inner: registered_users(&config).await,
        private_key_reads: AtomicUsize::new(0),
    });
    let orchestrator = TransferOrchestrator::new(
        config,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemoryRecordStore::new()),
        users.clone(),
    )
    .unwrap();

    let receipt = orchestrator
        .send(source(b"eyes only", 4), "memo.txt", &user("sender"), &user("receiver"))
        .await
        .unwrap();

    for outsider in ["sender", "mallory"] {
        let result = orchestrator.receive(&receipt.transfer_id, &user(outsider)).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }
    let unknown = orchestrator
        .receive(&TransferId::from_string("unknown-id"), &user("receiver"))
        .await;
    assert!(matches!(unknown, Err(Error::NotFound(_))));
    assert_eq!(users.private_key_reads.load(Ordering::SeqCst), 0);

    let delivery = orchestrator
        .receive(&receipt.transfer_id, &user("receiver"))
        .await
        .unwrap();
    assert_eq!(users.private_key_reads.load(Ordering::SeqCst), 1);
    assert_eq!(delivery.into_bytes().await.unwrap(), b"eyes only");
}
