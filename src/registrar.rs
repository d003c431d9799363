//! Name reservation index.
//!
//! Pairs a human-assigned name with the identifier holding it. Exactly one
//! identifier holds a given name, and an identifier holds at most one name.
//! Reserving the same pair again is a no-op so callers can retry.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Bindings {
    /// name → id
    names: HashMap<String, String>,
    /// id → name
    ids: HashMap<String, String>,
}

/// Thread-safe name ⇄ identifier registry.
#[derive(Debug, Default)]
pub struct Registrar {
    inner: RwLock<Bindings>,
}

impl Registrar {
    /// Creates an empty registrar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` for `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NameConflict`] if the name is held by another identifier, or
    /// if `id` already holds a different name.
    pub fn reserve(&self, name: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(holder) = inner.names.get(name) {
            if holder == id {
                return Ok(());
            }
            return Err(Error::NameConflict {
                name: name.to_string(),
                id: id.to_string(),
                holder: holder.clone(),
            });
        }

        if let Some(existing) = inner.ids.get(id) {
            return Err(Error::NameConflict {
                name: name.to_string(),
                id: id.to_string(),
                holder: format!("{id} (as '{existing}')"),
            });
        }

        inner.names.insert(name.to_string(), id.to_string());
        inner.ids.insert(id.to_string(), name.to_string());
        Ok(())
    }

    /// Releases `name`. Releasing an unreserved name is not an error.
    pub fn release(&self, name: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.names.remove(name) {
            inner.ids.remove(&id);
        }
    }

    /// Releases whatever name `id` holds.
    pub fn delete(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(name) = inner.ids.remove(id) {
            inner.names.remove(&name);
        }
    }

    /// Returns the identifier holding `name`.
    pub fn get(&self, name: &str) -> Result<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .names
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("name '{name}' is not reserved")))
    }

    /// Returns the name held by `id`.
    pub fn get_names(&self, id: &str) -> Result<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .ids
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no name reserved for '{id}'")))
    }

    /// Snapshot of all name → id bindings.
    pub fn get_all(&self) -> HashMap<String, String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.names.clone()
    }
}
