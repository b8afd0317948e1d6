pub mod records;
pub mod stores;
pub mod watch;

use serde::Serialize;
use serde_json::Value;
use tarn::Key;

/// Parse a key argument.
///
/// JSON integers, strings and arrays are taken as typed keys; anything
/// that is not JSON is a text key.
pub fn parse_key(raw: &str) -> Result<Key, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Key::from_json(&value)
            .ok_or_else(|| format!("'{}' is not a valid key (integer, string or array)", raw)),
        Err(_) => Ok(Key::Text(raw.to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}
