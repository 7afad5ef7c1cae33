//! Request-scoped context shared across the pipeline.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json_bytes::Value;

use crate::BoxError;

/// Context for one HTTP request or one WebSocket connection.
///
/// The context travels with every operation through hooks, extensions and the
/// engine. Cloning is cheap and all clones address the same underlying data;
/// a WebSocket connection shares one context between all of its operations.
///
/// Serializable values live in string-keyed entries. Data that is not
/// serializable can be stored through [`Context::extensions`]:
///
/// ```ignore
/// context.extensions().insert::<MyData>(data);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: Arc<DashMap<String, Value>>,
    extensions: Arc<parking_lot::Mutex<http::Extensions>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the context contains a value for the specified key.
    pub fn contains_key<K>(&self, key: K) -> bool
    where
        K: Into<String>,
    {
        self.entries.contains_key(&key.into())
    }

    /// Get a value from the context using the provided key.
    ///
    /// Fails if the stored value does not deserialize as `V`.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: DeserializeOwned,
    {
        match self.entries.get(&key.into()) {
            Some(value) => Ok(Some(serde_json_bytes::from_value(value.value().clone())?)),
            None => Ok(None),
        }
    }

    /// Insert a value into the context using the provided key, returning the
    /// previous value for that key if there was one.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<Value>, BoxError>
    where
        K: Into<String>,
        V: Serialize,
    {
        let value = serde_json_bytes::to_value(value)?;
        Ok(self.entries.insert(key.into(), value))
    }

    /// Insert a raw JSON value without going through serde conversion.
    pub fn insert_json_value<K>(&self, key: K, value: Value) -> Option<Value>
    where
        K: Into<String>,
    {
        self.entries.insert(key.into(), value)
    }

    /// Get a raw JSON value without going through serde conversion.
    pub fn get_json_value<K>(&self, key: K) -> Option<Value>
    where
        K: Into<String>,
    {
        self.entries.get(&key.into()).map(|v| v.value().clone())
    }

    /// Locks the typed extension storage for interaction.
    ///
    /// The lock is held until the returned guard drops, so keep the critical
    /// section short and never hold it across an `.await`.
    pub fn extensions(&self) -> parking_lot::MutexGuard<'_, http::Extensions> {
        self.extensions.lock()
    }
}
