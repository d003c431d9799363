//! In-memory entity stores.
//!
//! A [`MemoryStore`] maps identifiers to shared entity handles. The server
//! keeps three of them: ordinary containers, infra containers, and sandboxes.
//! Stores enforce no cross-references; keeping a container's sandbox present
//! is the caller's job.
//!
//! Entities are stored as `Arc<T>`, so [`MemoryStore::list`] hands out a
//! snapshot of whole objects: an entry replaced after the call is not seen,
//! and no caller ever observes a half-built entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::container::Container;
use crate::sandbox::Sandbox;

/// Thread-safe keyed collection of shared entities.
#[derive(Debug)]
pub struct MemoryStore<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

/// Store of containers (ordinary or infra).
pub type ContainerStore = MemoryStore<Container>;

/// Store of sandboxes.
pub type SandboxStore = MemoryStore<Sandbox>;

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> MemoryStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `id`.
    pub fn add(&self, id: &str, entity: Arc<T>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), entity);
    }

    /// Returns the entry for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Removes the entry for `id`, returning it.
    pub fn delete(&self, id: &str) -> Option<Arc<T>> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    /// Snapshot of every entry.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_delete() {
        let store: MemoryStore<String> = MemoryStore::new();
        store.add("a", Arc::new("first".to_string()));
        assert_eq!(store.get("a").as_deref().map(String::as_str), Some("first"));

        store.add("a", Arc::new("second".to_string()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").as_deref().map(String::as_str), Some("second"));

        assert!(store.delete("a").is_some());
        assert!(store.get("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_is_snapshot() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.add("one", Arc::new(1));
        let snapshot = store.list();
        store.add("two", Arc::new(2));
        store.delete("one");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(*snapshot[0], 1);
    }

    #[test]
    fn test_concurrent_list_and_mutate() {
        let store: Arc<MemoryStore<usize>> = Arc::new(MemoryStore::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let id = format!("{t}-{i}");
                        store.add(&id, Arc::new(i));
                        if i % 2 == 0 {
                            store.delete(&id);
                        }
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            for value in store.list() {
                assert!(*value < 500);
            }
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(store.len(), 4 * 250);
    }
}
