//! RFC 6902 JSON-Patch application over [`serde_json::Value`].
//!
//! Operations are applied strictly in sequence; the first inapplicable
//! operation aborts with a [`Protocol`](crate::error::Kind::Protocol) error.
//! Callers that need all-or-nothing semantics apply against a working copy and
//! commit only on success, which is exactly what the sync engine does.

use serde::Deserialize;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// The closed set of RFC 6902 operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

/// One patch operation against the cached document.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub from: Option<String>,
}

/// Apply an ordered operation sequence to `doc` in place.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<()> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<()> {
    match op.op {
        OpKind::Add => {
            let value = required_value(op)?;
            add(doc, &op.path, value)
        }
        OpKind::Remove => {
            remove(doc, &op.path)?;
            Ok(())
        }
        OpKind::Replace => {
            let value = required_value(op)?;
            replace(doc, &op.path, value)
        }
        OpKind::Move => {
            let from = required_from(op)?;
            if op.path.starts_with(&format!("{from}/")) {
                return Err(Error::protocol(format!(
                    "cannot move {from:?} into its own child {:?}",
                    op.path
                )));
            }
            let value = remove(doc, from)?;
            add(doc, &op.path, value)
        }
        OpKind::Copy => {
            let from = required_from(op)?;
            let value = lookup(doc, from)?.clone();
            add(doc, &op.path, value)
        }
        OpKind::Test => {
            let expected = required_value(op)?;
            let actual = lookup(doc, &op.path)?;
            if *actual == expected {
                Ok(())
            } else {
                Err(Error::protocol(format!(
                    "test failed at {:?}: expected {expected}, found {actual}",
                    op.path
                )))
            }
        }
    }
}

fn required_value(op: &PatchOp) -> Result<Value> {
    op.value
        .clone()
        .ok_or_else(|| Error::protocol(format!("{:?} operation at {:?} has no value", op.op, op.path)))
}

fn required_from<'op>(op: &'op PatchOp) -> Result<&'op str> {
    op.from
        .as_deref()
        .ok_or_else(|| Error::protocol(format!("{:?} operation at {:?} has no from", op.op, op.path)))
}

/// Split a JSON Pointer into unescaped reference tokens.
fn tokens(pointer: &str) -> Result<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(Error::protocol(format!(
            "pointer {pointer:?} does not start with '/'"
        )));
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str, len: usize, allow_end: bool) -> Result<usize> {
    if token == "-" && allow_end {
        return Ok(len);
    }
    let index: usize = token
        .parse()
        .map_err(|_| Error::protocol(format!("invalid array index {token:?}")))?;
    let bound = if allow_end { len } else { len.saturating_sub(1) };
    if index > bound || (!allow_end && len == 0) {
        return Err(Error::protocol(format!(
            "array index {index} out of bounds (len {len})"
        )));
    }
    Ok(index)
}

fn lookup<'doc>(doc: &'doc Value, pointer: &str) -> Result<&'doc Value> {
    let mut current = doc;
    for token in tokens(pointer)? {
        current = match current {
            Value::Object(map) => map
                .get(&token)
                .ok_or_else(|| Error::protocol(format!("no member {token:?} at {pointer:?}")))?,
            Value::Array(items) => {
                let index = array_index(&token, items.len(), false)?;
                &items[index]
            }
            _ => {
                return Err(Error::protocol(format!(
                    "pointer {pointer:?} descends into a scalar"
                )));
            }
        };
    }
    Ok(current)
}

/// Navigate to the parent of the pointer target, returning it with the final
/// token. A root pointer has no parent.
fn parent_of<'doc>(doc: &'doc mut Value, pointer: &str) -> Result<Option<(&'doc mut Value, String)>> {
    let mut path = tokens(pointer)?;
    let Some(last) = path.pop() else {
        return Ok(None);
    };

    let mut current = doc;
    for token in path {
        current = match current {
            Value::Object(map) => map
                .get_mut(&token)
                .ok_or_else(|| Error::protocol(format!("no member {token:?} at {pointer:?}")))?,
            Value::Array(items) => {
                let index = array_index(&token, items.len(), false)?;
                &mut items[index]
            }
            _ => {
                return Err(Error::protocol(format!(
                    "pointer {pointer:?} descends into a scalar"
                )));
            }
        };
    }
    Ok(Some((current, last)))
}

fn add(doc: &mut Value, pointer: &str, value: Value) -> Result<()> {
    let Some((parent, token)) = parent_of(doc, pointer)? else {
        *doc = value;
        return Ok(());
    };
    match parent {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(&token, items.len(), true)?;
            items.insert(index, value);
            Ok(())
        }
        _ => Err(Error::protocol(format!(
            "cannot add below scalar at {pointer:?}"
        ))),
    }
}

fn remove(doc: &mut Value, pointer: &str) -> Result<Value> {
    let Some((parent, token)) = parent_of(doc, pointer)? else {
        return Ok(std::mem::take(doc));
    };
    match parent {
        Value::Object(map) => map
            .remove(&token)
            .ok_or_else(|| Error::protocol(format!("no member to remove at {pointer:?}"))),
        Value::Array(items) => {
            let index = array_index(&token, items.len(), false)?;
            Ok(items.remove(index))
        }
        _ => Err(Error::protocol(format!(
            "cannot remove below scalar at {pointer:?}"
        ))),
    }
}

fn replace(doc: &mut Value, pointer: &str, value: Value) -> Result<()> {
    let Some((parent, token)) = parent_of(doc, pointer)? else {
        *doc = value;
        return Ok(());
    };
    match parent {
        Value::Object(map) => match map.get_mut(&token) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::protocol(format!(
                "no member to replace at {pointer:?}"
            ))),
        },
        Value::Array(items) => {
            let index = array_index(&token, items.len(), false)?;
            items[index] = value;
            Ok(())
        }
        _ => Err(Error::protocol(format!(
            "cannot replace below scalar at {pointer:?}"
        ))),
    }
}
