use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Mutable context map shared by every step in a chain. Clones are handles
/// to the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    values: Arc<Mutex<Map<String, Value>>>,
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a serializable value under `key`, replacing any previous value
    pub fn put(&self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.lock().insert(key.into(), value);
    }

    /// Fetch and deserialize the value under `key`, if present and of the
    /// expected shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let guard = self.values.lock();
        guard
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Snapshot of the current contents, for handlers and logging
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.lock().clone()
    }
}
