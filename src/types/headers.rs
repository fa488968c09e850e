//! Ordered, case-insensitive header map.
//!
//! Keys keep the spelling they were first inserted with, but every lookup,
//! replacement and removal compares them case-insensitively. Values are
//! free-form JSON so protocol handlers can carry arrays or structured values
//! (e.g. an `event` list for event sources).

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    // lowercased key -> (original key, value)
    entries: IndexMap<String, (String, Value)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header. A replaced header keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        match self.entries.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(&mut slot.1, value.into())),
            None => {
                self.entries.insert(key, (name, value.into()));
                None
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// Header value rendered as a string; arrays are joined with `", "`.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).and_then(value_to_header_string)
    }

    /// Header value split into a list.
    ///
    /// Arrays yield their string members, strings are split on commas. Empty
    /// members are dropped; `default` is returned when nothing remains.
    pub fn get_list(&self, name: &str, default: &[&str]) -> Vec<String> {
        let values: Vec<String> = match self.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(value_to_header_string)
                .flat_map(|s| split_list(&s))
                .collect(),
            Some(other) => value_to_header_string(other)
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            None => Vec::new(),
        };
        if values.is_empty() {
            default.iter().map(|s| s.to_string()).collect()
        } else {
            values
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries
            .shift_remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate headers in insertion order with their original spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Mutable iteration over values, used by variable replacement.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.entries.values_mut().map(|(_, value)| value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IndexMap::<String, Value>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

/// Render a header value as text; `None` for null and structured objects.
pub fn value_to_header_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_header_string).collect();
            Some(parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
