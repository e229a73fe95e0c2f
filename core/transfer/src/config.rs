//! Transfer pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use secureshare_common::{BlobPath, Error, Result};
use secureshare_crypto::CryptoConfig;
use secureshare_storage::{BlobStore, BlobStoreRegistry};

/// Default upper bound on a sent file's plaintext size (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// How a receive hands plaintext to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReceiveMode {
    /// Decrypt the whole file into a staging blob first, then stream that
    /// blob out and delete it. A padding or key failure is reported before
    /// the caller sees any byte.
    #[default]
    Staged,
    /// Decrypt on the fly while the caller reads; plaintext never touches
    /// storage, but a failure surfaces mid-stream.
    Streaming,
}

/// Blob store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Registered backend name (e.g., "local", "memory").
    pub provider: String,
    /// Backend-specific options.
    pub options: serde_json::Value,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            options: serde_json::Value::Object(Default::default()),
        }
    }
}

impl StorageConfig {
    /// Build the configured blob store.
    pub fn resolve(&self, registry: &BlobStoreRegistry) -> Result<Arc<dyn BlobStore>> {
        registry.resolve(&self.provider, self.options.clone())
    }
}

/// Configuration for a [`TransferOrchestrator`](crate::TransferOrchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Algorithms and key sizes.
    pub crypto: CryptoConfig,
    /// Largest accepted plaintext, in bytes.
    pub max_file_size: u64,
    /// Blob directory holding ciphertext.
    pub ciphertext_dir: String,
    /// Blob directory for materialized plaintext (uploads and staged receives).
    pub staging_dir: String,
    pub receive_mode: ReceiveMode,
    pub storage: StorageConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            crypto: CryptoConfig::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ciphertext_dir: "uploads".to_string(),
            staging_dir: "downloads".to_string(),
            receive_mode: ReceiveMode::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    /// - Invalid crypto parameters
    /// - Zero size limit
    /// - Directory names that are not a single safe path component, or
    ///   ciphertext and staging sharing a directory
    pub fn validate(&self) -> Result<()> {
        self.crypto.validate()?;

        if self.max_file_size == 0 {
            return Err(Error::Config("max_file_size must be positive".to_string()));
        }

        let ciphertext = self.ciphertext_dir()?;
        let staging = self.staging_dir()?;
        if ciphertext == staging {
            return Err(Error::Config(
                "ciphertext_dir and staging_dir must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Blob directory for ciphertext.
    pub fn ciphertext_dir(&self) -> Result<BlobPath> {
        single_dir(&self.ciphertext_dir, "ciphertext_dir")
    }

    /// Blob directory for staged plaintext.
    pub fn staging_dir(&self) -> Result<BlobPath> {
        single_dir(&self.staging_dir, "staging_dir")
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load and validate a JSON config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config as JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }
}

fn single_dir(name: &str, field: &str) -> Result<BlobPath> {
    let path = BlobPath::parse(name)
        .map_err(|e| Error::Config(format!("Invalid {}: {}", field, e)))?;
    if path.components().len() != 1 {
        return Err(Error::Config(format!(
            "{} must be a single directory name",
            field
        )));
    }
    Ok(path)
}
