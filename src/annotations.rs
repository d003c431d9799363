//! Typed access to the annotations of a persisted spec.
//!
//! Creation stores most entity fields as annotations on `config.json`, each
//! JSON value encoded independently inside one annotation string. Recovery
//! decodes them through [`Annotations`]; every decode failure becomes
//! [`Error::MalformedPersistedState`] naming the offending key.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Read-only view over an annotation map, tied to the entity it describes.
#[derive(Debug, Clone, Copy)]
pub struct Annotations<'a> {
    id: &'a str,
    map: &'a HashMap<String, String>,
}

impl<'a> Annotations<'a> {
    /// Wraps the annotations of entity `id`.
    pub fn new(id: &'a str, map: &'a HashMap<String, String>) -> Self {
        Self { id, map }
    }

    /// Identifier of the entity the annotations belong to.
    pub fn id(&self) -> &'a str {
        self.id
    }

    /// Decodes a required JSON-valued annotation.
    pub fn json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self
            .map
            .get(key)
            .ok_or_else(|| Error::malformed(self.id, format!("missing {key} annotation")))?;
        serde_json::from_str(raw).map_err(|e| {
            Error::malformed(self.id, format!("error unmarshalling {key} annotation: {e}"))
        })
    }

    /// Decodes an optional JSON-valued annotation. Absent or empty is `None`.
    pub fn optional_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.map.get(key).filter(|raw| !raw.is_empty()) {
            Some(_) => self.json(key).map(Some),
            None => Ok(None),
        }
    }

    /// Returns a scalar annotation, or `""` when absent.
    pub fn string(&self, key: &str) -> &'a str {
        self.map.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Returns a scalar annotation if present.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(String::as_str)
    }

    /// Returns true only if the annotation is exactly `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// Parses an RFC 3339 timestamp annotation.
    pub fn timestamp(&self, key: &str) -> Result<DateTime<Utc>> {
        let raw = self.string(key);
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| {
                Error::malformed(self.id, format!("parsing {key} timestamp '{raw}': {e}"))
            })
    }

    /// The underlying map.
    pub fn as_map(&self) -> &'a HashMap<String, String> {
        self.map
    }
}

/// Formats a timestamp the way [`Annotations::timestamp`] reads it back.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}
