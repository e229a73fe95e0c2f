//! Blob store registry for resolving backends by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::local::LocalBlobStore;
use crate::memory::MemoryBlobStore;
use crate::provider::BlobStore;
use secureshare_common::{Error, Result};

/// Factory function type for creating blob stores.
pub type BlobStoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BlobStore>> + Send + Sync>;

/// Registry for blob store factories.
///
/// Lets configuration pick a backend by name plus free-form JSON options.
pub struct BlobStoreRegistry {
    factories: HashMap<String, BlobStoreFactory>,
}

impl BlobStoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BlobStoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Blob store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a blob store by name and options.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Options invalid for the backend
    pub fn resolve(&self, name: &str, options: Value) -> Result<Arc<dyn BlobStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::Config(format!("Blob store '{}' is not registered", name)))?;
        factory(options)
    }
}

impl Default for BlobStoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
///
/// - `memory`: optional `quota` (bytes)
/// - `local`: required `root` directory
pub fn create_default_registry() -> BlobStoreRegistry {
    let mut factories: HashMap<String, BlobStoreFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|options| {
            let store = match options.get("quota").and_then(Value::as_u64) {
                Some(quota) => MemoryBlobStore::with_quota(quota),
                None => MemoryBlobStore::new(),
            };
            Ok(Arc::new(store))
        }),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|options| {
            let root = options
                .get("root")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Config("Local blob store requires 'root' path".to_string()))?;
            Ok(Arc::new(LocalBlobStore::new(root)?))
        }),
    );

    BlobStoreRegistry { factories }
}
