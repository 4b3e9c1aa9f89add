//! Key-value store collaborator
//!
//! Every component persists through [`KeyValueStore`], an async mapping from
//! string keys to JSON values with no multi-key transactions. Components own
//! disjoint key namespaces, listed in [`keys`].

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ByteguardError, Result};

/// A batch of key/value pairs
pub type StoreMap = Map<String, Value>;

/// Storage keys, grouped by owning component
pub mod keys {
    /// Usage ledger state
    pub const USAGE: &str = "usage";
    /// Budget settings
    pub const SETTINGS: &str = "settings";
    /// Low-data mode flag
    pub const LOW_DATA_MODE: &str = "lowDataMode";
    /// Blocked domain list
    pub const BLOCKED_DOMAINS: &str = "blockedDomains";
    /// Auto low-data flag
    pub const AUTO_LOW_DATA: &str = "autoLowData";
    /// Time of the last budget alert
    pub const LAST_ALERT_TIME: &str = "lastAlertTime";
    /// Percentage at the last budget alert
    pub const LAST_ALERT_PERCENTAGE: &str = "lastAlertPercentage";
}

/// Async persistent key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the given keys; absent keys are missing from the result
    async fn get(&self, keys: &[&str]) -> Result<StoreMap>;

    /// Merge the given pairs into the store
    async fn set(&self, items: StoreMap) -> Result<()>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}

/// Typed helpers over [`KeyValueStore`]
pub trait KeyValueStoreExt: KeyValueStore {
    /// Fetch and decode a single key
    fn get_value<'a, T>(
        &'a self,
        key: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<T>>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            let mut found = self.get(&[key]).await?;
            match found.remove(key) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                    ByteguardError::InvalidStoredValue {
                        key: key.to_string(),
                        error: e.to_string(),
                    }
                }),
            }
        }
    }

    /// Encode and store a single key
    fn set_value<'a, T>(
        &'a self,
        key: &'a str,
        value: &'a T,
    ) -> impl std::future::Future<Output = Result<()>> + Send
    where
        T: Serialize + Send + Sync,
    {
        async move {
            let mut items = StoreMap::new();
            items.insert(key.to_string(), serde_json::to_value(value)?);
            self.set(items).await
        }
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

/// Ephemeral in-memory store
///
/// Counts writes and can be told to fail them, which is what tests need to
/// observe coalescing and error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreMap>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `data`
    pub fn with_data(data: StoreMap) -> Self {
        Self {
            data: Mutex::new(data),
            ..Self::default()
        }
    }

    /// Number of successful `set` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Copy of the full contents
    pub async fn dump(&self) -> StoreMap {
        self.data.lock().await.clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        let data = self.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: StoreMap) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(ByteguardError::Store("write rejected".to_string()));
        }
        self.data.lock().await.extend(items);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.data.lock().await.clear();
        Ok(())
    }
}

/// Store backed by a single JSON document on disk
///
/// The whole document is rewritten on every `set` through a temporary file
/// and a rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<StoreMap>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StoreMap::new(),
            Ok(bytes) => serde_json::from_slice::<StoreMap>(&bytes).map_err(|e| {
                ByteguardError::CorruptStateFile {
                    file: path.clone(),
                    error: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file {} not found, starting empty", path.display());
                StoreMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &StoreMap) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(data)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        let data = self.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: StoreMap) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.extend(items);
        self.persist(&next).await?;
        *data = next;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut data = self.data.lock().await;
        self.persist(&StoreMap::new()).await?;
        data.clear();
        Ok(())
    }
}
