//! Source parameters, versions and their content hashes
//!
//! A source is an opaque key/value map handed to a checker. Its identity is
//! the SHA256 of its canonical JSON form, so two sources with the same keys and
//! values hash the same regardless of the order they were written in.

use crate::error::{RadarError, RadarResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Hash bytes with SHA256, returning lowercase hex
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Rebuild a JSON value with every object's keys in sorted order
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Opaque checker parameters (also used for get params)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(BTreeMap<String, Value>);

impl Source {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Parse a source from JSON text; anything but an object is rejected
    pub fn from_json(text: &str) -> RadarResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RadarError::InvalidSource(e.to_string()))?;
        Self::from_value(value)
    }

    /// Convert an already-parsed JSON value
    pub fn from_value(value: Value) -> RadarResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(RadarError::InvalidSource(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical JSON text (sorted keys at every depth)
    pub fn to_canonical_json(&self) -> String {
        let value = Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        );
        value.to_string()
    }

    /// Content hash identifying this source
    pub fn hash(&self) -> String {
        sha256_hex(self.to_canonical_json().as_bytes())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A version reported by a checker, e.g. `{"ref": "abc123"}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(BTreeMap<String, String>);

impl Version {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Canonical JSON text, used as the stored form of a version
    pub fn to_canonical_json(&self) -> String {
        // BTreeMap keys serialize in order; a map of strings cannot fail
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> RadarResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_json())
    }
}

/// One piece of metadata discovered while fetching a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

impl MetadataField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
