//! Persistence collaborator for the active mode name.

use parking_lot::Mutex;
use reflex_core::Fault;
use std::collections::HashMap;

/// String key/value storage. Backed by whatever the application persists to.
pub trait ModeStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), Fault>;
}

/// In-memory store for tests and for robots without persistent storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModeStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), Fault> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
