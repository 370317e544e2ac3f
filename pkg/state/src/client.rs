use pkg_constants::state::EVENT_LOG_CAPACITY;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::watch::{EventLog, EventType};

/// Objects written with [`StateStore::put_versioned`].
pub trait Versioned {
    fn resource_version(&self) -> u64;
    fn set_resource_version(&mut self, version: u64);
}

/// Persistent object store backed by SlateDB.
///
/// Every put/delete is echoed into `event_log` so controllers can watch it.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    pub event_log: EventLog,
    /// Serializes conditional writes against each other.
    cas_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        Self::open(object_store).await
    }

    /// Open a store that lives only in memory. Used by tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::open(Arc::new(InMemory::new())).await
    }

    async fn open(object_store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
            cas_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e))?;
        self.event_log.emit(EventType::Put, key).await;
        Ok(())
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e)),
        }
    }

    /// Delete a key from the store.
    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB delete failed: {}", e))?;
        self.event_log.emit(EventType::Delete, key).await;
        Ok(())
    }

    /// List all key-value pairs whose keys start with `prefix`.
    pub async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Fetch and decode a JSON object.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data).map_err(|e| {
                anyhow::anyhow!("Failed to decode {}: {}", key, e)
            })?)),
            None => Ok(None),
        }
    }

    /// Encode and store a JSON object.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(value)?;
        self.put(key, &data).await
    }

    /// Store `value` only if the stored copy still has the version `value` was
    /// read at. An absent object counts as version 0. Returns the new version.
    pub async fn put_versioned<T>(&self, key: &str, value: &T) -> anyhow::Result<u64>
    where
        T: Versioned + Serialize + DeserializeOwned + Clone,
    {
        let _guard = self.cas_lock.lock().await;
        let found = self
            .get_json::<T>(key)
            .await?
            .map(|stored| stored.resource_version())
            .unwrap_or(0);
        let expected = value.resource_version();
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            }
            .into());
        }
        let mut next = value.clone();
        next.set_resource_version(found + 1);
        self.put_json(key, &next).await?;
        Ok(found + 1)
    }

    /// Delete the object at `key` if `check` accepts its stored state.
    /// Returns false when there was nothing to delete.
    pub async fn delete_json_if<T, F>(&self, key: &str, check: F) -> anyhow::Result<bool>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> bool,
    {
        let _guard = self.cas_lock.lock().await;
        let Some(stored) = self.get_json::<T>(key).await? else {
            return Ok(false);
        };
        if !check(&stored) {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
            }
            .into());
        }
        self.delete(key).await?;
        Ok(true)
    }

    /// Decode every object under `prefix`, skipping entries that fail to parse.
    pub async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        let entries = self.list_prefix(prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| match serde_json::from_slice(&v) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    debug!("Skipping undecodable entry {}: {}", k, e);
                    None
                }
            })
            .collect())
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}
