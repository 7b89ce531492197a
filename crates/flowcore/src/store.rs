use crate::{StoreError, Value};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// String-keyed store shared by every node of a flow run.
///
/// Cloning yields another handle to the same map, which is how the store is
/// handed to nested flows and to parallel batch tasks. Individual reads and
/// writes are safe from any task, but nothing coordinates writes to
/// different keys: parallel nodes that need a consistent multi-key view must
/// partition their keys or serialise through [`SharedStore::update`].
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<DashMap<String, Value>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a plain JSON object. Non-object input yields an empty store.
    pub fn from_json(json: serde_json::Value) -> Self {
        let store = Self::new();
        if let serde_json::Value::Object(obj) = json {
            for (key, value) in obj {
                store.insert(key, Value::from_json(value));
            }
        }
        store
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.inner
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().to_json()))
                .collect(),
        )
    }

    /// Returns a clone of the value under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    pub fn require(&self, key: &str) -> Result<Value, StoreError> {
        self.get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<String, StoreError> {
        self.typed(key, "string", |v| v.as_str().map(str::to_string))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, StoreError> {
        self.typed(key, "number", Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, StoreError> {
        self.typed(key, "integer", Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, StoreError> {
        self.typed(key, "bool", Value::as_bool)
    }

    pub fn get_array(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        self.typed(key, "array", |v| v.as_array().map(<[Value]>::to_vec))
    }

    /// Decode the value under `key` into any deserializable type, going
    /// through its plain JSON rendering.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let value = self.require(key)?;
        serde_json::from_value(value.to_json()).map_err(|e| StoreError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn typed<T>(
        &self,
        key: &str,
        expected: &'static str,
        extract: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<T, StoreError> {
        let entry = self
            .inner
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let value = entry.value();
        extract(value).ok_or_else(|| StoreError::TypeMismatch {
            key: key.to_string(),
            expected,
            actual: value.type_name(),
        })
    }

    /// Insert a value, returning the previous one if any
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Read-modify-write of a single key, atomic with respect to other
    /// writers of the same key. A missing key starts as `Value::Null`.
    pub fn update<F>(&self, key: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut entry = self.inner.entry(key.into()).or_insert(Value::Null);
        f(entry.value_mut());
    }

    /// Append text to a string entry, separating with `separator` when the
    /// entry already holds text. Non-string entries are replaced.
    pub fn append_str(&self, key: impl Into<String>, text: &str, separator: &str) {
        self.update(key, |value| match value {
            Value::String(existing) if !existing.is_empty() => {
                existing.push_str(separator);
                existing.push_str(text);
            }
            other => *other = Value::String(text.to_string()),
        });
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Point-in-time copy of the whole store
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.inner.iter().map(|e| (e.key().clone(), e.value().clone())))
            .finish()
    }
}
