use super::LocalStore;
use crate::error::SaveResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// In-process store. Clones share the same map, so a test can keep a handle
/// after giving the store to a manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }
}

impl LocalStore for MemoryStore {
    fn read(&self, key: &str) -> SaveResult<Option<String>> {
        Ok(self.get(key))
    }

    fn write(&mut self, key: &str, value: &str) -> SaveResult<()> {
        self.insert(key, value);
        Ok(())
    }
}
