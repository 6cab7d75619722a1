//! Flat `key=value` persistence.
//!
//! Structured values are flattened into dotted keys (`chip.match_radius=8`).
//! Leaf values are written as JSON scalars; on reading, anything that does
//! not parse as JSON is taken as a bare string, so hand-written files may
//! leave paths unquoted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum KeywordError {
    #[error("Line {line}: expected key=value, found {text:?}")]
    Syntax { line: usize, text: String },
    #[error("Keyword {0} is used both as a value and as a group")]
    Conflict(String),
    #[error("Keyword value conversion failed")]
    Json(#[from] serde_json::Error),
    #[error("Failed to access keyword file")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keywordlist {
    entries: BTreeMap<String, String>,
}

pub fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else if key.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Parses a stored value: JSON when possible, bare string otherwise.
pub fn decode_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl Keywordlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses `key=value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, KeywordError> {
        let mut kwl = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(KeywordError::Syntax {
                    line: index + 1,
                    text: line.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(KeywordError::Syntax {
                    line: index + 1,
                    text: line.to_string(),
                });
            }
            kwl.insert(key, value.trim());
        }
        Ok(kwl)
    }

    pub fn read_file(path: &Path) -> Result<Self, KeywordError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn write_file(&self, path: &Path) -> Result<(), KeywordError> {
        std::fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Stores a serializable value under `prefix`, one keyword per leaf.
    pub fn save_struct<T: Serialize + ?Sized>(
        &mut self,
        prefix: &str,
        value: &T,
    ) -> Result<(), KeywordError> {
        let value = serde_json::to_value(value)?;
        self.flatten(prefix.to_string(), &value)
    }

    fn flatten(&mut self, key: String, value: &Value) -> Result<(), KeywordError> {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (name, child) in map {
                    self.flatten(join_key(&key, name), child)?;
                }
                Ok(())
            }
            leaf => {
                self.insert(key, serde_json::to_string(leaf)?);
                Ok(())
            }
        }
    }

    /// Rebuilds a value from the keywords under `prefix`.
    ///
    /// Missing fields are left to the target's serde defaults.
    pub fn load_struct<T: DeserializeOwned>(&self, prefix: &str) -> Result<T, KeywordError> {
        Ok(serde_json::from_value(self.collect(prefix)?)?)
    }

    /// Nested JSON view of the keywords under `prefix`.
    pub fn collect(&self, prefix: &str) -> Result<Value, KeywordError> {
        if let Some(text) = self.get(prefix) {
            return Ok(decode_value(text));
        }

        let group = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}.")
        };
        let mut root = Map::new();
        for (key, text) in self.entries.range(group.clone()..) {
            let Some(rest) = key.strip_prefix(&group) else {
                break;
            };
            insert_path(&mut root, rest, decode_value(text), key)?;
        }
        Ok(Value::Object(root))
    }
}

fn insert_path(
    root: &mut Map<String, Value>,
    path: &str,
    value: Value,
    full_key: &str,
) -> Result<(), KeywordError> {
    match path.split_once('.') {
        None => {
            if root.get(path).is_some_and(Value::is_object) {
                return Err(KeywordError::Conflict(full_key.to_string()));
            }
            root.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, tail)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match child {
                Value::Object(map) => insert_path(map, tail, value, full_key),
                _ => Err(KeywordError::Conflict(full_key.to_string())),
            }
        }
    }
}

impl fmt::Display for Keywordlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}={value}")?;
        }
        Ok(())
    }
}
