//! Stores by account.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::config::DiskConfig;
use crate::disk::DiskStore;
use crate::error::{StoreError, StoreResult};
use crate::mapped::MappedStore;
use crate::memory::MemoryStore;
use crate::traits::{ReadOnlyStore, Store};

/// Hands out the store serving an account.
pub trait StoreFactory: Send + Sync {
    fn store(&self, account: i64) -> StoreResult<Arc<dyn Store>>;

    /// Human-readable identity of the underlying storage. Two factories with
    /// the same description serve the same blobs.
    fn describe(&self) -> String;
}

/// One [`DiskStore`] per account, under `<root>/<account>`.
#[derive(Clone, Debug)]
pub struct DiskStoreFactory {
    config: DiskConfig,
}

impl DiskStoreFactory {
    pub fn new(config: DiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    /// The concrete store for `account`, creating its directory if needed.
    pub fn disk_store(&self, account: i64) -> StoreResult<DiskStore> {
        let config = DiskConfig {
            root: self.config.root.join(account.to_string()),
            ..self.config.clone()
        };
        Ok(DiskStore::with_config(&config)?.with_realm(account))
    }
}

impl StoreFactory for DiskStoreFactory {
    fn store(&self, account: i64) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(self.disk_store(account)?))
    }

    fn describe(&self) -> String {
        format!("[CAS] {}", self.config.root.display())
    }
}

/// One [`MemoryStore`] per account, created on first request.
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: RwLock<HashMap<i64, MemoryStore>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete store for `account`.
    pub fn memory_store(&self, account: i64) -> MemoryStore {
        if let Some(store) = self.stores.read().expect("lock poisoned").get(&account) {
            return store.clone();
        }
        let mut stores = self.stores.write().expect("lock poisoned");
        stores
            .entry(account)
            .or_insert_with(|| {
                debug!(account, "created memory store");
                MemoryStore::new()
            })
            .clone()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn store(&self, account: i64) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(self.memory_store(account)))
    }

    fn describe(&self) -> String {
        format!("[CAS] memory {:08X}", self as *const Self as usize as u32)
    }
}

/// Serves a single mapped store, for realm 0 only.
pub struct MappedStoreFactory {
    store: Arc<MappedStore>,
}

impl MappedStoreFactory {
    pub fn new(store: MappedStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn single_store(&self) -> &Arc<MappedStore> {
        &self.store
    }
}

impl StoreFactory for MappedStoreFactory {
    fn store(&self, account: i64) -> StoreResult<Arc<dyn Store>> {
        let expected = self.store.realm_id();
        if account != expected {
            return Err(StoreError::RealmMismatch {
                expected,
                actual: account,
            });
        }
        Ok(self.store.clone())
    }

    fn describe(&self) -> String {
        "[CAS] memory-mapped file".to_string()
    }
}
