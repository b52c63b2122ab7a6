//! Keyed blob storage backends
//!
//! A [`StorageBackend`] is the smallest surface the durable store needs:
//! string values under string keys, like a browser origin's local storage.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Keyed string storage surviving process restarts
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process backend
///
/// Share one instance (via `Arc`) between scheduler generations to model a
/// restart against the same storage origin.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    disabled: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend where every operation fails, like storage blocked by the host
    pub fn disabled() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            disabled: true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.disabled {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "storage disabled",
            )));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
