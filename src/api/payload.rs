//! Request adapter: turns a JSON body (plus query-string controls) into an
//! `ExecutionRequest` for the statement's payload shape.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::engine::{Bindings, EngineError, ExecutionRequest, Payload};
use crate::statement::definition::{PAGING_LIMIT, PAGING_START};
use crate::types::PayloadShape;

pub const CALLBACK: &str = "callback";
pub const RECACHE: &str = "recache";

/// Top-level fields that steer the request instead of binding parameters
pub const CONTROL_FIELDS: [&str; 4] = [CALLBACK, PAGING_START, PAGING_LIMIT, RECACHE];

/// Decoded request: engine input plus the JSONP callback, if any
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRequest {
    pub request: ExecutionRequest,
    pub callback: Option<String>,
}

/// Decode `body` for a statement expecting `shape`. Control fields in the
/// body win over the same fields in `query`.
pub fn decode(
    path: &str,
    shape: PayloadShape,
    body: Value,
    query: &BTreeMap<String, String>,
) -> Result<DecodedRequest, EngineError> {
    let mut controls: Map<String, Value> = query
        .iter()
        .filter(|(k, _)| CONTROL_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let payload = match body {
        Value::Null => empty_payload(shape),
        Value::Object(mut map) => {
            for field in CONTROL_FIELDS {
                if let Some(value) = map.remove(field) {
                    controls.insert(field.to_string(), value);
                }
            }
            match shape {
                PayloadShape::Object => Payload::Object(map),
                PayloadShape::Groups => Payload::Groups(groups(path, map)?),
                PayloadShape::Array => return Err(mismatch(path, shape, "object")),
            }
        }
        Value::Array(items) => match shape {
            PayloadShape::Array => Payload::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| object(path, item, || format!("element {} is not an object", i)))
                    .collect::<Result<_, _>>()?,
            ),
            _ => return Err(mismatch(path, shape, "array")),
        },
        other => return Err(mismatch(path, shape, json_type(&other))),
    };

    let request = ExecutionRequest::new(payload)
        .with_paging(
            integer_control(&controls, PAGING_START)?,
            integer_control(&controls, PAGING_LIMIT)?,
        )
        .with_recache(recache_control(&controls)?);

    Ok(DecodedRequest {
        request,
        callback: callback_control(&controls)?,
    })
}

/// Callback a client asked for, if it is a usable name. Lets failures that
/// happen before or during `decode` still be rendered as JSONP.
pub fn requested_callback(body: &Value, query: &BTreeMap<String, String>) -> Option<String> {
    let name = match body.get(CALLBACK) {
        Some(Value::String(s)) => Some(s.as_str()),
        _ => query.get(CALLBACK).map(String::as_str),
    }?;
    is_callback_name(name).then(|| name.to_string())
}

/// Query-string parameters as an object payload (GET requests)
pub fn query_bindings(query: &BTreeMap<String, String>) -> Value {
    Value::Object(
        query
            .iter()
            .filter(|(k, _)| !CONTROL_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn empty_payload(shape: PayloadShape) -> Payload {
    match shape {
        PayloadShape::Object => Payload::Object(Map::new()),
        PayloadShape::Array => Payload::Array(Vec::new()),
        PayloadShape::Groups => Payload::Groups(Vec::new()),
    }
}

fn groups(path: &str, map: Map<String, Value>) -> Result<Vec<(String, Vec<Bindings>)>, EngineError> {
    map.into_iter()
        .map(|(name, value)| {
            let Value::Array(items) = value else {
                return Err(EngineError::ShapeMismatch {
                    path: path.to_string(),
                    reason: format!("group `{}` is not an array", name),
                });
            };
            let items = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| object(path, item, || format!("group `{}` element {} is not an object", name, i)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((name, items))
        })
        .collect()
}

fn object(path: &str, value: Value, reason: impl FnOnce() -> String) -> Result<Bindings, EngineError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(EngineError::ShapeMismatch {
            path: path.to_string(),
            reason: reason(),
        }),
    }
}

fn mismatch(path: &str, expected: PayloadShape, actual: &str) -> EngineError {
    EngineError::ShapeMismatch {
        path: path.to_string(),
        reason: format!("expected {} payload, got {}", expected, actual),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn integer_control(controls: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, EngineError> {
    let invalid = || EngineError::InvalidControl {
        field,
        reason: "expected an integer".to_string(),
    };
    match controls.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn recache_control(controls: &Map<String, Value>) -> Result<bool, EngineError> {
    let invalid = || EngineError::InvalidControl {
        field: RECACHE,
        reason: "expected a boolean".to_string(),
    };
    match controls.get(RECACHE) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid()),
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

fn callback_control(controls: &Map<String, Value>) -> Result<Option<String>, EngineError> {
    match controls.get(CALLBACK) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) if is_callback_name(s) => Ok(Some(s.clone())),
        Some(_) => Err(EngineError::InvalidControl {
            field: CALLBACK,
            reason: "must be a JavaScript identifier path".to_string(),
        }),
    }
}

/// `name` or `ns.name`, identifiers made of letters, digits, `_` and `$`
pub fn is_callback_name(name: &str) -> bool {
    name.len() <= 128
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .map_or(false, |c| c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}
