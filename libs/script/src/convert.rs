//! Conversions between `serde_json::Value` / our wire types and Rhai's
//! dynamic value model.

use std::collections::HashMap;

use rhai::{Dynamic, Map};
use serde_json::{Number, Value};

use crate::hooks::{HookDecision, RetryDecision};
use crate::request::{Request, RequestMeta, Response};

pub fn json_to_dynamic(v: &Value) -> Dynamic {
    match v {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => number_to_dynamic(n),
        Value::String(s) => s.clone().into(),
        Value::Array(items) => Dynamic::from_array(items.iter().map(json_to_dynamic).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from_map(out)
        }
    }
}

fn number_to_dynamic(n: &Number) -> Dynamic {
    if let Some(i) = n.as_i64() {
        i.into()
    } else {
        n.as_f64().unwrap_or(0.0).into()
    }
}

pub fn dynamic_to_json(d: &Dynamic) -> Value {
    if d.is_unit() {
        Value::Null
    } else if let Some(b) = d.clone().try_cast::<bool>() {
        Value::Bool(b)
    } else if let Some(i) = d.clone().try_cast::<i64>() {
        Value::Number(i.into())
    } else if let Some(f) = d.clone().try_cast::<f64>() {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    } else if let Some(s) = d.clone().try_cast::<rhai::ImmutableString>() {
        Value::String(s.to_string())
    } else if let Some(arr) = d.clone().try_cast::<rhai::Array>() {
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if let Some(map) = d.clone().try_cast::<Map>() {
        let mut obj = serde_json::Map::new();
        for (k, v) in map.iter() {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        Value::Object(obj)
    } else {
        Value::Null
    }
}

fn meta_to_dynamic(meta: &RequestMeta) -> Dynamic {
    let mut out = Map::new();
    for (k, v) in &meta.0 {
        out.insert(k.as_str().into(), json_to_dynamic(v));
    }
    Dynamic::from_map(out)
}

fn dynamic_to_meta(d: &Dynamic) -> HashMap<String, Value> {
    match d.clone().try_cast::<Map>() {
        Some(map) => map.iter().map(|(k, v)| (k.to_string(), dynamic_to_json(v))).collect(),
        None => HashMap::new(),
    }
}

/// Builds a *shared* Rhai map for a [`Request`] so a hook function can mutate
/// `meta` in place and have the host observe the mutation after the call
/// returns, matching the "scripts may mutate only req.meta" contract.
pub fn request_to_shared_dynamic(req: &Request) -> Dynamic {
    let mut map = Map::new();
    map.insert("id".into(), req.id.clone().into());
    map.insert("client_id".into(), req.client_id.clone().into());
    map.insert("data".into(), json_to_dynamic(&req.data));
    map.insert("timestamp".into(), req.timestamp.into());
    map.insert("meta".into(), meta_to_dynamic(&req.meta));
    Dynamic::from_map(map).into_shared()
}

/// Reads the (possibly script-mutated) `meta` field back out of a shared
/// request dynamic and writes it into `req`.
pub fn apply_meta_back(shared: &Dynamic, req: &mut Request) {
    if let Some(map) = shared.clone().try_cast::<Map>() {
        if let Some(meta_dyn) = map.get("meta") {
            req.meta = RequestMeta(dynamic_to_meta(meta_dyn));
        }
    }
}

pub fn response_to_dynamic(resp: &Response) -> Dynamic {
    let mut map = Map::new();
    map.insert("id".into(), resp.id.clone().into());
    map.insert("ok".into(), resp.ok.into());
    map.insert("data".into(), json_to_dynamic(&resp.data));
    map.insert(
        "error".into(),
        resp.error.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT),
    );
    map.insert("timestamp".into(), resp.timestamp.into());
    Dynamic::from_map(map)
}

pub fn dynamic_to_hook_decision(d: Option<Dynamic>) -> HookDecision {
    let Some(d) = d else { return HookDecision::default() };
    let Some(map) = d.try_cast::<Map>() else { return HookDecision::default() };

    let allow = map.get("allow").and_then(|v| v.clone().try_cast::<bool>()).unwrap_or(true);
    let delay_ms = map
        .get("delay")
        .and_then(|v| v.clone().try_cast::<i64>())
        .map(|v| v.max(0) as u64)
        .unwrap_or(0);
    let timeout_ms = map
        .get("timeout")
        .and_then(|v| v.clone().try_cast::<i64>())
        .filter(|v| *v > 0)
        .map(|v| v as u64);

    HookDecision { allow, delay_ms, timeout_ms }
}

pub fn dynamic_to_retry_decision(d: Option<Dynamic>) -> RetryDecision {
    let Some(d) = d else { return RetryDecision::default() };
    let Some(map) = d.try_cast::<Map>() else { return RetryDecision::default() };

    let allow = map.get("allow").and_then(|v| v.clone().try_cast::<bool>()).unwrap_or(false);
    let delay_ms = map
        .get("delay")
        .and_then(|v| v.clone().try_cast::<i64>())
        .map(|v| v.max(0) as u64)
        .unwrap_or(0);

    RetryDecision { allow, delay_ms }
}
