//! Remote document store the cloud reconciler talks to.

use crate::{
    error::{SaveError, SaveResult},
    store::SqliteStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Whole-root document for a user.
pub fn web_path(user_id: &str) -> String {
    format!("users/{user_id}/web")
}

/// Legacy bundled single-save document for a user.
pub fn legacy_path(user_id: &str) -> String {
    format!("users/{user_id}/player")
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `None` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> SaveResult<Option<String>>;

    async fn set(&self, path: &str, value: &str) -> SaveResult<()>;
}

/// In-process remote. Clones share documents, so two reconcilers can act as
/// two devices of one account.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    docs: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, path: &str) -> Option<String> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn put_document(&self, path: &str, value: &str) {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), value.to_string());
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, path: &str) -> SaveResult<Option<String>> {
        Ok(self.document(path))
    }

    async fn set(&self, path: &str, value: &str) -> SaveResult<()> {
        self.put_document(path, value);
        Ok(())
    }
}

/// File-backed remote, used by the save tool to stand in for the cloud.
pub struct SqliteRemote {
    store: Mutex<SqliteStore>,
}

impl SqliteRemote {
    pub fn open(path: &str) -> SaveResult<Self> {
        let store = SqliteStore::open(path)?;
        store.migrate()?;
        Ok(Self { store: Mutex::new(store) })
    }

    pub fn in_memory() -> SaveResult<Self> {
        let store = SqliteStore::in_memory()?;
        store.migrate()?;
        Ok(Self { store: Mutex::new(store) })
    }

    fn with_store<T>(&self, f: impl FnOnce(&SqliteStore) -> SaveResult<T>) -> SaveResult<T> {
        let store = self.store.lock().map_err(|_| SaveError::Remote {
            message: "remote store lock poisoned".into(),
        })?;
        f(&store)
    }
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    async fn get(&self, path: &str) -> SaveResult<Option<String>> {
        self.with_store(|store| store.get_remote(path))
    }

    async fn set(&self, path: &str, value: &str) -> SaveResult<()> {
        self.with_store(|store| store.set_remote(path, value))
    }
}
