use std::collections::HashMap;

use serde_json::Value;

/// Opaque per-request bag a behavior script may read and mutate. Nothing else
/// in a [`Request`] is writable from script land.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta(pub HashMap<String, Value>);

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub client_id: String,
    pub data: Value,
    pub timestamp: i64,
    pub meta: RequestMeta,
}

impl Request {
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            data: Value::Null,
            timestamp,
            meta: RequestMeta::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    pub data: Value,
    pub error: Option<String>,
    pub timestamp: i64,
}

impl Response {
    pub fn success(id: impl Into<String>, timestamp: i64) -> Self {
        Self { id: id.into(), ok: true, data: Value::String("OK".to_string()), error: None, timestamp }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>, timestamp: i64) -> Self {
        Self { id: id.into(), ok: false, data: Value::Null, error: Some(error.into()), timestamp }
    }
}
