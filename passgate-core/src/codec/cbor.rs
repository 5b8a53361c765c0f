//! Thin helpers over `ciborium::Value` shared by the codec modules.

use ciborium::value::Value;

use super::error::{CodecError, CodecResult};

/// Decode exactly one CBOR item from the front of `bytes`.
///
/// Returns the item and the number of bytes it occupied, so callers can
/// continue parsing (or reject) whatever follows.
pub(crate) fn read_item(bytes: &[u8]) -> CodecResult<(Value, usize)> {
    let mut cursor = bytes;
    let value: Value = ciborium::from_reader(&mut cursor)
        .map_err(|e| CodecError::MalformedCbor(e.to_string()))?;
    Ok((value, bytes.len() - cursor.len()))
}

/// Decode a CBOR item that must span the whole buffer.
pub(crate) fn read_exact_item(bytes: &[u8]) -> CodecResult<Value> {
    let (value, consumed) = read_item(bytes)?;
    if consumed != bytes.len() {
        return Err(CodecError::MalformedCbor(format!(
            "{} trailing bytes after CBOR item",
            bytes.len() - consumed
        )));
    }
    Ok(value)
}

/// Serialize a value to a fresh buffer.
pub(crate) fn to_vec(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::MalformedCbor(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_integer()
        .and_then(|i| i64::try_from(i128::from(i)).ok())
}

/// The first key that appears more than once in `map`, if any.
pub(crate) fn duplicate_key(map: &[(Value, Value)]) -> Option<&Value> {
    map.iter()
        .enumerate()
        .find(|(i, (key, _))| map[..*i].iter().any(|(earlier, _)| earlier == key))
        .map(|(_, (key, _))| key)
}

/// Find the value stored under an integer label.
pub(crate) fn get_int_label(map: &[(Value, Value)], label: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| as_i64(k) == Some(label))
        .map(|(_, v)| v)
}

/// Find the value stored under a text key.
pub(crate) fn get_text_key<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}
