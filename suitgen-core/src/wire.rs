//! Canonical wire encoding for manifests and signed envelopes.
//!
//! Uses CBOR (RFC 8949) in its deterministic profile:
//!
//! - integers, lengths and tags use the shortest head
//! - all strings, arrays and maps have definite lengths
//! - map entries are sorted bytewise by their encoded key (§4.2.1)
//!
//! The whole tree is validated and converted before a single byte is
//! written, so an unsupported value never produces partial output.

use crate::error::{Error, Result};
use crate::value::{Key, Value};
use base64::Engine;
use ciborium::value::{Integer, Value as CborValue};

/// Maximum accepted size of an encoded manifest or envelope (64 KB).
///
/// Manifests for constrained devices are a few hundred bytes; this bound
/// only exists to refuse absurd inputs before parsing them.
pub const MAX_ENCODED_SIZE: usize = 64 * 1024;

const TAG_POSITIVE_BIGNUM: u64 = 2;
const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// Encode a value tree into its canonical bytes.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let cbor = to_cbor(value)?;
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut buf)?;
    Ok(buf)
}

/// Encoded form of a single mapping key. Canonical map order is the
/// bytewise order of these.
pub fn encode_key(key: &Key) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&key_to_cbor(key), &mut buf)?;
    Ok(buf)
}

/// Decode bytes into a value tree.
///
/// Returns `PayloadTooLarge` if the input exceeds [`MAX_ENCODED_SIZE`].
pub fn decode(data: &[u8]) -> Result<Value> {
    // Check size BEFORE attempting deserialization
    if data.len() > MAX_ENCODED_SIZE {
        return Err(Error::PayloadTooLarge {
            size: data.len(),
            max: MAX_ENCODED_SIZE,
        });
    }

    let mut reader = data;
    let cbor: CborValue = ciborium::de::from_reader(&mut reader)?;
    if !reader.is_empty() {
        return Err(Error::Decoding(format!(
            "{} trailing bytes after top-level item",
            reader.len()
        )));
    }

    from_cbor(cbor)
}

/// Whether `data` is exactly the canonical encoding of what it decodes to.
pub fn is_canonical(data: &[u8]) -> Result<bool> {
    let value = decode(data)?;
    Ok(encode(&value)? == data)
}

/// Text armor for an encoded manifest or envelope (URL-safe base64, no
/// padding), for transports that cannot carry raw bytes.
pub fn encode_base64(encoded: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(encoded)
}

/// Strip the text armor from [`encode_base64`] output.
///
/// The size bound of [`decode`] applies to the unarmored bytes and is
/// checked before decoding.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let decoded_len = text.len() / 4 * 3 + (text.len() % 4).saturating_sub(1);
    if decoded_len > MAX_ENCODED_SIZE {
        return Err(Error::PayloadTooLarge {
            size: decoded_len,
            max: MAX_ENCODED_SIZE,
        });
    }

    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| Error::Decoding(format!("invalid base64: {}", e)))
}

fn key_to_cbor(key: &Key) -> CborValue {
    match key {
        Key::Int(i) => CborValue::Integer(Integer::from(*i)),
        Key::Text(s) => CborValue::Text(s.clone()),
    }
}

fn to_cbor(value: &Value) -> Result<CborValue> {
    match value {
        Value::Integer(i) => Integer::try_from(*i)
            .map(CborValue::Integer)
            .map_err(|_| Error::Encoding(format!("integer {} is outside the encodable range", i))),
        Value::Bytes(b) => Ok(CborValue::Bytes(b.clone())),
        Value::Text(s) => Ok(CborValue::Text(s.clone())),
        Value::Array(items) => Ok(CborValue::Array(
            items.iter().map(to_cbor).collect::<Result<_>>()?,
        )),
        Value::Map(entries) => {
            let mut keyed = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                keyed.push((encode_key(k)?, k, to_cbor(v)?));
            }
            keyed.sort_by(|a, b| a.0.cmp(&b.0));

            // Equal keys are adjacent once sorted
            if let Some(dup) = keyed.windows(2).find(|w| w[0].0 == w[1].0) {
                return Err(Error::Encoding(format!("duplicate mapping key {}", dup[0].1)));
            }

            Ok(CborValue::Map(
                keyed
                    .into_iter()
                    .map(|(_, k, v)| (key_to_cbor(k), v))
                    .collect(),
            ))
        }
        // The decoder folds bignums back into plain integers
        Value::Tag(tag @ (TAG_POSITIVE_BIGNUM | TAG_NEGATIVE_BIGNUM), _) => Err(Error::Encoding(
            format!("tag {} (bignum) is not supported", tag),
        )),
        Value::Tag(tag, inner) => Ok(CborValue::Tag(*tag, Box::new(to_cbor(inner)?))),
    }
}

fn from_cbor(cbor: CborValue) -> Result<Value> {
    match cbor {
        CborValue::Integer(i) => Ok(Value::Integer(i128::from(i))),
        CborValue::Bytes(b) => Ok(Value::Bytes(b)),
        CborValue::Text(s) => Ok(Value::Text(s)),
        CborValue::Array(items) => Ok(Value::Array(
            items.into_iter().map(from_cbor).collect::<Result<_>>()?,
        )),
        CborValue::Map(entries) => {
            let mut out: Vec<(Key, Value)> = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = key_from_cbor(k)?;
                if out.iter().any(|(seen, _)| seen == &key) {
                    return Err(Error::Decoding(format!("duplicate mapping key {}", key)));
                }
                out.push((key, from_cbor(v)?));
            }
            Ok(Value::Map(out))
        }
        CborValue::Tag(tag, inner) => Ok(Value::Tag(tag, Box::new(from_cbor(*inner)?))),
        CborValue::Float(f) => Err(Error::Decoding(format!("unsupported float {}", f))),
        CborValue::Bool(b) => Err(Error::Decoding(format!("unsupported boolean {}", b))),
        CborValue::Null => Err(Error::Decoding("unsupported null".to_string())),
        other => Err(Error::Decoding(format!("unsupported item {:?}", other))),
    }
}

fn key_from_cbor(key: CborValue) -> Result<Key> {
    match key {
        CborValue::Integer(i) => i64::try_from(i128::from(i))
            .map(Key::Int)
            .map_err(|_| Error::Decoding(format!("mapping key {} out of range", i128::from(i)))),
        CborValue::Text(s) => Ok(Key::Text(s)),
        other => Err(Error::Decoding(format!(
            "mapping keys must be integers or text, got {:?}",
            other
        ))),
    }
}
