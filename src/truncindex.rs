//! Prefix-searchable identifier index.
//!
//! Resolves short identifiers (any unique prefix) to full ones, the way
//! `docker ps` style tooling accepts truncated IDs.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Thread-safe set of identifiers supporting unique-prefix lookup.
#[derive(Debug, Default)]
pub struct TruncIndex {
    ids: RwLock<BTreeSet<String>>,
}

impl TruncIndex {
    /// Creates an index seeded with `ids`.
    ///
    /// Invalid and duplicate entries are skipped.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = Self::default();
        for id in ids {
            let _ = index.add(&id.into());
        }
        index
    }

    /// Adds an identifier.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidId`] for empty identifiers or ones containing
    /// whitespace, [`Error::IdAlreadyExists`] for duplicates.
    pub fn add(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidId {
                id: id.to_string(),
                reason: "ID cannot be empty".to_string(),
            });
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidId {
                id: id.to_string(),
                reason: "ID cannot contain whitespace".to_string(),
            });
        }

        let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id.to_string()) {
            return Err(Error::IdAlreadyExists(id.to_string()));
        }
        Ok(())
    }

    /// Removes an identifier.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
        if !ids.remove(id) {
            return Err(Error::NotFound(format!("ID '{id}' is not indexed")));
        }
        Ok(())
    }

    /// Resolves a prefix to the single identifier starting with it.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no identifier (or an empty prefix) matches,
    /// [`Error::AmbiguousPrefix`] when more than one does.
    pub fn get(&self, prefix: &str) -> Result<String> {
        if prefix.is_empty() {
            return Err(Error::NotFound("prefix can't be empty".to_string()));
        }

        let ids = self.ids.read().unwrap_or_else(|e| e.into_inner());
        let mut matches = ids
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|id| id.starts_with(prefix));

        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            (Some(_), Some(_)) => Err(Error::AmbiguousPrefix(prefix.to_string())),
            (None, _) => Err(Error::NotFound(format!("no ID matches prefix '{prefix}'"))),
        }
    }

    /// Returns true if the exact identifier is indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    /// Snapshot of every indexed identifier, in sorted order.
    pub fn iterate(&self) -> Vec<String> {
        self.ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
