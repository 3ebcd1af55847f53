//! Value tree fed to the canonical encoder.
//!
//! The encoder only ever sees this closed set of shapes, so every value it
//! is handed has exactly one encoding (see [`crate::wire`]).

use crate::error::Result;
use std::fmt;

/// Standard CBOR tag for an epoch-based date/time.
pub const EPOCH_TIME_TAG: u64 = 1;

/// Key of a mapping entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<u8> for Key {
    fn from(i: u8) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// A node of a manifest (or payload) tree.
///
/// Mappings keep their entries in a `Vec` so that insertion order is
/// observable; the encoder sorts them, it never trusts the source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Any integer in the encodable range -2^64 ..= 2^64-1.
    Integer(i128),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Vec<(Key, Value)>),
    Tag(u64, Box<Value>),
}

impl Value {
    /// Build a mapping from `(key, value)` pairs, in the given order.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a sequence.
    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Epoch-time value (`tag 1` wrapping seconds since the Unix epoch).
    pub fn timestamp(epoch_secs: i64) -> Self {
        Value::Tag(EPOCH_TIME_TAG, Box::new(Value::Integer(i128::from(epoch_secs))))
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer value narrowed to `u64`, if it fits.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(|i| u64::try_from(i).ok())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Key, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a mapping entry. Returns `None` for non-mappings.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Return the same tree with every mapping sorted into canonical order.
    ///
    /// Two trees that differ only in mapping insertion order canonicalize to
    /// equal values. Decoding canonical bytes yields a canonical tree.
    pub fn canonicalize(self) -> Result<Value> {
        Ok(match self {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::canonicalize)
                    .collect::<Result<_>>()?,
            ),
            Value::Map(entries) => {
                let mut keyed = entries
                    .into_iter()
                    .map(|(k, v)| Ok((crate::wire::encode_key(&k)?, k, v.canonicalize()?)))
                    .collect::<Result<Vec<_>>>()?;
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
            }
            Value::Tag(tag, inner) => Value::Tag(tag, Box::new(inner.canonicalize()?)),
            other => other,
        })
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}
