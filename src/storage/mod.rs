pub mod file_system;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

pub use file_system::FileSystemStore;
pub use memory::MemoryStore;

/// Abstract key-value persistence
///
/// Keys are `/`-separated paths, values are UTF-8 documents (JSON for
/// everything the wallet persists).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, sorted
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// A view of another store with every key prefixed by a folder
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, folder: &str) -> Self {
        let mut prefix = folder.trim_matches('/').to_string();
        prefix.push('/');
        Self { inner, prefix }
    }

    /// Nested scope, e.g. `wallet/<id>/` then `memos/`
    pub fn join(&self, folder: &str) -> Self {
        let mut prefix = self.prefix.clone();
        prefix.push_str(folder.trim_matches('/'));
        prefix.push('/');
        Self {
            inner: self.inner.clone(),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Remove every key under this scope
    pub async fn clear(&self) -> Result<(), StorageError> {
        for key in self.inner.keys(&self.prefix).await? {
            self.inner.remove(&key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for ScopedStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.read(&self.full_key(key)).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.write(&self.full_key(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(&self.full_key(key)).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let keys = self.inner.keys(&self.full_key(prefix)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.read(key).await? {
        Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    store.write(key, &json).await
}
