//! Durable local storage.
//!
//! RULE: only the storage manager writes the save key. Everything else
//! reads through it.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::SaveResult;

/// A string-keyed, string-valued durable store.
pub trait LocalStore: Send {
    fn read(&self, key: &str) -> SaveResult<Option<String>>;

    fn write(&mut self, key: &str, value: &str) -> SaveResult<()>;
}
