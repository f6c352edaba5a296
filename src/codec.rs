//! Stateless codec between wire bytes and application values.
//!
//! Keyed frames arrive as UTF-8 JSON envelopes carrying a Base64 payload; the
//! payload's entries in turn carry their own Base64-wrapped `data` field. The
//! helpers here invert exactly: `decode_payload(&encode_payload(v)) == v` for
//! every serializable `v`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::Result;
use crate::error::Error;
use crate::patch::{OpKind, PatchOp};
use crate::types::{Entry, Frame, Mode};

/// Interpret a binary WebSocket frame as UTF-8 text.
pub fn text_from_binary(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::protocol("frame is not valid UTF-8"))
}

/// Decode the wire envelope of a keyed frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    let text = text_from_binary(bytes)?;
    serde_json::from_str(text).map_err(|e| Error::protocol(format!("malformed frame: {e}")))
}

/// Base64-wrap a JSON value for publishing.
#[must_use]
pub fn encode_payload(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

/// Decode a Base64-wrapped JSON value.
pub fn decode_payload(data: &str) -> Result<Value> {
    let raw = STANDARD.decode(data)?;
    serde_json::from_slice(&raw).map_err(|e| Error::protocol(format!("malformed payload: {e}")))
}

/// Decode a snapshot payload into the full cache document.
///
/// An empty payload is the server's way of announcing that nothing is stored
/// yet: the empty [`Entry`] for single mode, the empty sequence for multi.
pub fn decode_snapshot(mode: Mode, data: &str) -> Result<Value> {
    let raw = STANDARD.decode(data)?;
    if raw.is_empty() {
        return Ok(match mode {
            Mode::Single => serde_json::to_value(Entry::empty())?,
            Mode::Multi => Value::Array(Vec::new()),
        });
    }

    let value: Value =
        serde_json::from_slice(&raw).map_err(|e| Error::protocol(format!("malformed snapshot: {e}")))?;
    decode_document(mode, value)
}

/// Decode the nested Base64 `data` field of every entry in a raw document.
///
/// Shared between the sync engine (snapshot frames) and the REST client (`get`
/// responses). A non-array multi document decodes to the empty sequence.
pub fn decode_document(mode: Mode, mut value: Value) -> Result<Value> {
    match mode {
        Mode::Single => {
            decode_entry_data(&mut value)?;
            Ok(value)
        }
        Mode::Multi => match value {
            Value::Array(mut entries) => {
                for entry in &mut entries {
                    decode_entry_data(entry)?;
                }
                Ok(Value::Array(entries))
            }
            _ => Ok(Value::Array(Vec::new())),
        },
    }
}

fn decode_entry_data(entry: &mut Value) -> Result<()> {
    let decoded = match entry.get("data").and_then(Value::as_str) {
        Some(data) => Some(decode_payload(data)?),
        None => None,
    };
    if let Some(decoded) = decoded {
        entry["data"] = decoded;
    }
    Ok(())
}

/// Decode a patch payload into an ordered operation sequence, unwrapping the
/// Base64 `data` payloads embedded in `add` values and in operations that
/// target a `data` field.
pub fn decode_ops(data: &str) -> Result<Vec<PatchOp>> {
    let raw = STANDARD.decode(data)?;
    let mut ops: Vec<PatchOp> = serde_json::from_slice(&raw)
        .map_err(|e| Error::protocol(format!("malformed patch sequence: {e}")))?;
    for op in &mut ops {
        decode_op_payload(op)?;
    }
    Ok(ops)
}

fn decode_op_payload(op: &mut PatchOp) -> Result<()> {
    let Some(value) = op.value.as_mut() else {
        return Ok(());
    };

    if op.op == OpKind::Add && value.is_object() {
        // A freshly added entry carries its payload Base64-wrapped.
        return decode_entry_data(value);
    }

    if pointer_targets_data(&op.path) {
        let decoded = match &*value {
            Value::String(data) => Some(decode_payload(data)?),
            Value::Object(fields) => match fields.get("data").and_then(Value::as_str) {
                Some(data) => Some(decode_payload(data)?),
                None => None,
            },
            _ => None,
        };
        if let Some(decoded) = decoded {
            *value = decoded;
        }
    }

    Ok(())
}

fn pointer_targets_data(path: &str) -> bool {
    path.split('/').any(|token| token == "data")
}
