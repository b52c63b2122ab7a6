//! Durable store for undelivered events
//!
//! Holds events whose send failed, or that could not be handed to the
//! emergency channel at teardown, so the next scheduler start can pick them
//! up again. The whole queue lives as one JSON array under [`STORAGE_KEY`],
//! capped at a fixed count with the oldest events evicted first.
//!
//! Every operation degrades to a no-op when storage is unavailable. The
//! store never returns an error to its caller.

mod backend;
mod sqlite;

use std::sync::Arc;

pub use backend::{MemoryStorage, StorageBackend};
pub use sqlite::SqliteStorage;

use crate::types::FormEvent;

/// Key under which the persisted queue is stored
pub const STORAGE_KEY: &str = "formtrace_pending_events";

/// Maximum number of persisted events
pub const MAX_STORED_EVENTS: usize = 1000;

const PROBE_KEY: &str = "__formtrace_probe__";

/// Bounded FIFO of events persisted outside process memory
#[derive(Clone)]
pub struct DurableStore {
    /// `None` when the probe at construction failed
    backend: Option<Arc<dyn StorageBackend>>,
    capacity: usize,
}

impl DurableStore {
    /// Wrap a backend, probing it once with a write/remove cycle
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_capacity(backend, MAX_STORED_EVENTS)
    }

    pub fn with_capacity(backend: Arc<dyn StorageBackend>, capacity: usize) -> Self {
        let available = backend
            .set(PROBE_KEY, "1")
            .and_then(|_| backend.remove(PROBE_KEY));

        let backend = match available {
            Ok(()) => Some(backend),
            Err(e) => {
                tracing::warn!(error = %e, "Event storage unavailable, persistence disabled");
                None
            }
        };

        Self { backend, capacity }
    }

    /// A store that never persists anything
    pub fn unavailable() -> Self {
        Self {
            backend: None,
            capacity: MAX_STORED_EVENTS,
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append events, evicting from the front past capacity
    ///
    /// Returns whether the queue was written. Failures are logged, never
    /// raised; an empty slice counts as written.
    pub fn store(&self, events: &[FormEvent]) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        if events.is_empty() {
            return true;
        }

        let mut persisted = self.retrieve();
        persisted.extend_from_slice(events);
        let overflow = persisted.len().saturating_sub(self.capacity);
        if overflow > 0 {
            persisted.drain(..overflow);
            tracing::debug!(dropped = overflow, "Evicted oldest persisted events");
        }

        let result = serde_json::to_string(&persisted)
            .map_err(crate::error::Error::from)
            .and_then(|blob| backend.set(STORAGE_KEY, &blob));

        match result {
            Ok(()) => {
                tracing::debug!(
                    added = events.len(),
                    total = persisted.len(),
                    "Persisted undelivered events"
                );
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to persist events");
                false
            }
        }
    }

    /// Persisted events in original order; empty on any failure
    pub fn retrieve(&self) -> Vec<FormEvent> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };

        let blob = match backend.get(STORAGE_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read persisted events");
                return Vec::new();
            }
        };

        serde_json::from_str(&blob).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring malformed persisted events");
            Vec::new()
        })
    }

    pub fn clear(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.remove(STORAGE_KEY) {
                tracing::debug!(error = %e, "Failed to clear persisted events");
            }
        }
    }

    /// Number of persisted events
    pub fn len(&self) -> usize {
        self.retrieve().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("available", &self.is_available())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::EventKind;

    fn events(range: std::ops::Range<usize>) -> Vec<FormEvent> {
        range
            .map(|i| FormEvent::new("s", "form", format!("field_{}", i), EventKind::Focus))
            .collect()
    }

    fn field_ids(events: &[FormEvent]) -> Vec<String> {
        events.iter().map(|e| e.field_id.clone()).collect()
    }

    #[test]
    fn test_store_appends_in_order() {
        let store = DurableStore::new(Arc::new(MemoryStorage::new()));
        store.store(&events(0..3));
        store.store(&events(3..5));

        assert_eq!(field_ids(&store.retrieve()), field_ids(&events(0..5)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = DurableStore::new(Arc::new(MemoryStorage::new()));
        let k = 37;
        for chunk in events(0..MAX_STORED_EVENTS + k).chunks(10) {
            store.store(chunk);
        }

        let kept = store.retrieve();
        assert_eq!(kept.len(), MAX_STORED_EVENTS);
        assert_eq!(kept[0].field_id, format!("field_{}", k));
        assert_eq!(
            kept.last().unwrap().field_id,
            format!("field_{}", MAX_STORED_EVENTS + k - 1)
        );
    }

    #[test]
    fn test_clear_empties_store() {
        let store = DurableStore::new(Arc::new(MemoryStorage::new()));
        store.store(&events(0..2));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_blob_reads_as_empty() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set(STORAGE_KEY, "{not json").unwrap();
        let store = DurableStore::new(backend.clone());

        assert!(store.retrieve().is_empty());

        // the next store overwrites the malformed blob
        store.store(&events(0..1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unavailable_storage_is_noop() {
        let store = DurableStore::new(Arc::new(MemoryStorage::disabled()));
        assert!(!store.is_available());

        assert!(!store.store(&events(0..3)));
        assert!(store.retrieve().is_empty());
        store.clear();

        assert!(!DurableStore::unavailable().is_available());
    }

    /// Accepts small writes but rejects the queue blob, like a full quota
    struct QuotaExceeded(MemoryStorage);

    impl StorageBackend for QuotaExceeded {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == STORAGE_KEY {
                return Err(crate::error::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "quota exceeded",
                )));
            }
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key)
        }
    }

    #[test]
    fn test_store_reports_failed_write() {
        let store = DurableStore::new(Arc::new(QuotaExceeded(MemoryStorage::new())));
        assert!(store.is_available());

        assert!(!store.store(&events(0..2)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_reports_success() {
        let store = DurableStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.store(&events(0..2)));
        assert!(store.store(&[]));
    }

    #[test]
    fn test_probe_key_is_cleaned_up() {
        let backend = Arc::new(MemoryStorage::new());
        let _store = DurableStore::new(backend.clone());
        assert_eq!(backend.get(PROBE_KEY).unwrap(), None);
    }
}
