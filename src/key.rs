//! Record keys and key ranges.
//!
//! Keys are stored as order-preserving byte strings so SQLite's BLOB
//! comparison (memcmp) agrees with [`Key`]'s `Ord`:
//!
//! - `Int`: tag `0x10`, 8 bytes big-endian with the sign bit flipped
//! - `Text`: tag `0x20`, UTF-8 bytes with `0x00` escaped as `0x00 0xFF`,
//!   terminated by `0x00 0x00`
//! - `Array`: tag `0x40`, encoded elements, terminated by `0x00`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;
use thiserror::Error;

const TAG_INT: u8 = 0x10;
const TAG_TEXT: u8 = 0x20;
const TAG_ARRAY: u8 = 0x40;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Error returned when an encoded key cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyDecodeError {
    #[error("unexpected end of key at byte {0}")]
    Truncated(usize),

    #[error("unknown key tag {tag:#04x} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("invalid escape sequence at byte {0}")]
    InvalidEscape(usize),

    #[error("text key is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after key")]
    TrailingBytes(usize),
}

/// A record key.
///
/// Ordering: every `Int` sorts before every `Text`, which sorts before
/// every `Array`. Arrays compare element-wise, a prefix sorting first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
    Array(Vec<Key>),
}

impl Key {
    /// Build a key from a JSON value, if the value is a valid key.
    ///
    /// Integers, strings and arrays of valid keys qualify. Anything else
    /// (floats, booleans, null, objects) yields `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Key::Int),
            serde_json::Value::String(s) => Some(Key::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Key::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// The JSON form of this key (number, string or array).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Key::Int(v) => serde_json::Value::from(*v),
            Key::Text(s) => serde_json::Value::String(s.clone()),
            Key::Array(items) => serde_json::Value::Array(items.iter().map(Key::to_json).collect()),
        }
    }

    /// Encode into the order-preserving byte form used by storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Key::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
            }
            Key::Text(s) => {
                out.push(TAG_TEXT);
                for &b in s.as_bytes() {
                    out.push(b);
                    if b == TERMINATOR {
                        out.push(ESCAPE);
                    }
                }
                out.push(TERMINATOR);
                out.push(TERMINATOR);
            }
            Key::Array(items) => {
                out.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(out);
                }
                out.push(TERMINATOR);
            }
        }
    }

    /// Decode a key previously produced by [`Key::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, KeyDecodeError> {
        let mut pos = 0;
        let key = decode_at(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(KeyDecodeError::TrailingBytes(bytes.len() - pos));
        }
        Ok(key)
    }
}

fn decode_at(bytes: &[u8], pos: &mut usize) -> Result<Key, KeyDecodeError> {
    let tag = *bytes.get(*pos).ok_or(KeyDecodeError::Truncated(*pos))?;
    let offset = *pos;
    *pos += 1;

    match tag {
        TAG_INT => {
            let end = *pos + 8;
            let raw: [u8; 8] = bytes
                .get(*pos..end)
                .and_then(|s| s.try_into().ok())
                .ok_or(KeyDecodeError::Truncated(bytes.len()))?;
            *pos = end;
            Ok(Key::Int((u64::from_be_bytes(raw) ^ (1 << 63)) as i64))
        }
        TAG_TEXT => {
            let mut buf = Vec::new();
            loop {
                let b = *bytes.get(*pos).ok_or(KeyDecodeError::Truncated(*pos))?;
                *pos += 1;
                if b != TERMINATOR {
                    buf.push(b);
                    continue;
                }
                match bytes.get(*pos) {
                    Some(&TERMINATOR) => {
                        *pos += 1;
                        break;
                    }
                    Some(&ESCAPE) => {
                        *pos += 1;
                        buf.push(TERMINATOR);
                    }
                    Some(_) => return Err(KeyDecodeError::InvalidEscape(*pos)),
                    None => return Err(KeyDecodeError::Truncated(*pos)),
                }
            }
            String::from_utf8(buf)
                .map(Key::Text)
                .map_err(|_| KeyDecodeError::InvalidUtf8)
        }
        TAG_ARRAY => {
            let mut items = Vec::new();
            loop {
                match bytes.get(*pos) {
                    Some(&TERMINATOR) => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => items.push(decode_at(bytes, pos)?),
                    None => return Err(KeyDecodeError::Truncated(*pos)),
                }
            }
            Ok(Key::Array(items))
        }
        tag => Err(KeyDecodeError::UnknownTag { tag, offset }),
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{v}"),
            Key::Text(s) => write!(f, "{s:?}"),
            Key::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(i64::from(v))
    }
}

impl From<u32> for Key {
    fn from(v: u32) -> Self {
        Key::Int(i64::from(v))
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Text(v)
    }
}

impl From<Vec<Key>> for Key {
    fn from(v: Vec<Key>) -> Self {
        Key::Array(v)
    }
}

/// A contiguous range of keys.
///
/// Both ends may be inclusive, exclusive or unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// The range covering every key.
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range holding exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// A range between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: make_bound(lower.into(), lower_open),
            upper: make_bound(upper.into(), upper_open),
        }
    }

    /// All keys above `lower` (exclusive when `open`).
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: make_bound(lower.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// All keys below `upper` (exclusive when `open`).
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: make_bound(upper.into(), open),
        }
    }

    pub fn lower(&self) -> &Bound<Key> {
        &self.lower
    }

    pub fn upper(&self) -> &Bound<Key> {
        &self.upper
    }

    /// Whether `key` falls inside this range.
    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above && below
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        Self::only(key)
    }
}

fn make_bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys() -> Vec<Key> {
        vec![
            Key::Int(i64::MIN),
            Key::Int(-1),
            Key::Int(0),
            Key::Int(7),
            Key::Int(i64::MAX),
            Key::from(""),
            Key::from("a"),
            Key::from("a\0"),
            Key::from("a\0b"),
            Key::from("ab"),
            Key::from("b"),
            Key::Array(vec![]),
            Key::Array(vec![Key::Int(1)]),
            Key::Array(vec![Key::Int(1), Key::Int(2)]),
            Key::Array(vec![Key::Int(1), Key::from("x")]),
            Key::Array(vec![Key::from("a")]),
            Key::Array(vec![Key::Array(vec![Key::Int(3)])]),
        ]
    }

    #[test]
    fn test_encoding_preserves_order() {
        let keys = sample_keys();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
            assert!(
                pair[0].encode() < pair[1].encode(),
                "encoded {} should sort before encoded {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        for key in sample_keys() {
            assert_eq!(Key::decode(&key.encode()).unwrap(), key);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Key::decode(&[]), Err(KeyDecodeError::Truncated(0)));
        assert!(matches!(
            Key::decode(&[0x99]),
            Err(KeyDecodeError::UnknownTag { tag: 0x99, offset: 0 })
        ));
        assert!(Key::decode(&[TAG_INT, 0, 1]).is_err());

        let mut trailing = Key::Int(1).encode();
        trailing.push(0);
        assert_eq!(Key::decode(&trailing), Err(KeyDecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Key::from_json(&serde_json::json!(42)), Some(Key::Int(42)));
        assert_eq!(Key::from_json(&serde_json::json!("x")), Some(Key::from("x")));
        assert_eq!(
            Key::from_json(&serde_json::json!([1, "a"])),
            Some(Key::Array(vec![Key::Int(1), Key::from("a")]))
        );
        assert_eq!(Key::from_json(&serde_json::json!(1.5)), None);
        assert_eq!(Key::from_json(&serde_json::json!(null)), None);
        assert_eq!(Key::from_json(&serde_json::json!([1, true])), None);
    }

    #[test]
    fn test_json_form() {
        let key = Key::Array(vec![Key::Int(1), Key::from("a")]);
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"[1,"a"]"#);
        assert_eq!(serde_json::from_str::<Key>(r#"[1,"a"]"#).unwrap(), key);
        assert!(serde_json::from_str::<Key>("1.5").is_err());
    }

    #[test]
    fn test_range_contains() {
        let range = KeyRange::bound(5, 10, false, false);
        assert!(range.contains(&Key::Int(5)));
        assert!(range.contains(&Key::Int(7)));
        assert!(range.contains(&Key::Int(10)));
        assert!(!range.contains(&Key::Int(20)));
        assert!(!range.contains(&Key::from("7")));

        let open = KeyRange::bound(5, 10, true, true);
        assert!(!open.contains(&Key::Int(5)));
        assert!(!open.contains(&Key::Int(10)));

        assert!(KeyRange::only(42).contains(&Key::Int(42)));
        assert!(!KeyRange::only(42).contains(&Key::Int(43)));
        assert!(KeyRange::lower_bound(0, true).contains(&Key::Int(1)));
        assert!(!KeyRange::lower_bound(0, true).contains(&Key::Int(0)));
        assert!(KeyRange::upper_bound("m", false).contains(&Key::Int(99)));
        assert!(KeyRange::all().contains(&Key::Array(vec![])));
    }
}
