//! Message body decoding.
//!
//! Some producers JSON-encode the payload before handing it to a client
//! that encodes it again, so a body may arrive as a JSON string whose
//! contents are the real object. We unwrap exactly one such level and no
//! more: a string inside a string is rejected rather than guessed at.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Decode a queue body into a payload object.
pub fn decode_payload(body: &Value) -> Result<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map.clone()),
        Value::String(inner) => match serde_json::from_str::<Value>(inner) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::MalformedPayload(format!(
                "string-encoded body holds {}, expected an object",
                kind(&other)
            ))),
            Err(e) => Err(Error::MalformedPayload(format!(
                "string-encoded body is not JSON: {e}"
            ))),
        },
        other => Err(Error::MalformedPayload(format!(
            "body is {}, expected an object",
            kind(other)
        ))),
    }
}

/// Decode a raw text body (as read off the wire).
pub fn decode_text(text: &str) -> Result<Map<String, Value>> {
    let body: Value = serde_json::from_str(text)
        .map_err(|e| Error::MalformedPayload(format!("body is not JSON: {e}")))?;
    decode_payload(&body)
}

/// Render a scalar payload field as template text.
pub fn field_text(payload: &Map<String, Value>, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
