use serde_json::{Map, Value};

/// The string at `key`, or an empty string when it is missing or not a string.
pub fn payload_str<'a>(payload: &'a Map<String, Value>, key: &str) -> &'a str {
	payload.get(key).and_then(Value::as_str).unwrap_or_default()
}
