//! Value marshaling between the host interchange form and script values.
//!
//! The host side of the boundary speaks `serde_json::Value`: UTF-8 text,
//! ordered sequences, and string-keyed mappings. Conversion preserves
//! sequence order and length exactly and mapping key sets exactly; mapping
//! key *order* is not part of the contract. Text arriving as raw bytes is
//! admitted through [`text_from_bytes`], which never fails: invalid UTF-8 is
//! replaced with a best-effort decoding and reported once to the diagnostic
//! sink with an escaped rendering of the offending bytes.

use crate::engine::Engine;
use crate::error::ScriptError;
use crate::heap::Scope;
use crate::platform::{DiagnosticKind, DiagnosticSink};
use crate::prelude::*;
use crate::value::{ObjKind, ScriptStr, Value};

/// Convert a host value into a script value. Objects are allocated mortal
/// in `scope`; scalars need no anchor.
pub fn to_script(engine: &mut Engine, scope: &Scope, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
        serde_json::Value::String(s) => Value::Str(ScriptStr::from(s.as_str())),
        serde_json::Value::Array(items) => {
            let converted: Vec<Value> = items.iter().map(|v| to_script(engine, scope, v)).collect();
            let handle = engine.heap().alloc_in(scope, ObjKind::List(converted));
            Value::Obj(handle)
        }
        serde_json::Value::Object(entries) => {
            let mut map = index_map_with_capacity(entries.len());
            for (k, v) in entries {
                let key = engine.intern(k);
                let val = to_script(engine, scope, v);
                map.insert(key, val);
            }
            let handle = engine.heap().alloc_in(scope, ObjKind::Map(map));
            Value::Obj(handle)
        }
    }
}

/// Convert a script value back into the host interchange form.
///
/// Non-finite floats become null (the interchange form cannot carry them)
/// and callables become null. Records marshal as a mapping of their fields.
/// A self-referential structure is a runtime error, never a hang.
pub fn to_host(value: &Value) -> Result<serde_json::Value, ScriptError> {
    let mut visited = FxHashSet::default();
    to_host_inner(value, &mut visited)
}

fn to_host_inner(
    value: &Value,
    visited: &mut FxHashSet<u64>,
) -> Result<serde_json::Value, ScriptError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::Number(serde_json::Number::from(*n))),
        Value::Float(n) => Ok(serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        Value::Str(s) => Ok(serde_json::Value::String(s.as_str().to_owned())),
        Value::Obj(handle) => {
            if !visited.insert(handle.id()) {
                return Err(ScriptError::runtime("cannot marshal a circular structure"));
            }
            let result = {
                let body = handle.borrow();
                match &body.kind {
                    ObjKind::List(items) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            out.push(to_host_inner(item, visited)?);
                        }
                        Ok(serde_json::Value::Array(out))
                    }
                    ObjKind::Map(entries) => {
                        let mut out = serde_json::Map::with_capacity(entries.len());
                        for (k, v) in entries {
                            out.insert(k.as_str().to_owned(), to_host_inner(v, visited)?);
                        }
                        Ok(serde_json::Value::Object(out))
                    }
                    ObjKind::Record { fields, .. } => {
                        let mut out = serde_json::Map::with_capacity(fields.len());
                        for (k, v) in fields {
                            out.insert(k.as_str().to_owned(), to_host_inner(v, visited)?);
                        }
                        Ok(serde_json::Value::Object(out))
                    }
                    ObjKind::Callable(_) => Ok(serde_json::Value::Null),
                }
            };
            visited.remove(&handle.id());
            result
        }
    }
}

/// Admit text from a byte source (internal buffers, legacy callers).
///
/// Valid UTF-8 converts as-is. Invalid input does not fail the conversion:
/// the offending bytes are reported to the sink in escaped form and a lossy
/// decoding is used as the value.
pub fn text_from_bytes(sink: &dyn DiagnosticSink, bytes: &[u8]) -> ScriptStr {
    match std::str::from_utf8(bytes) {
        Ok(s) => ScriptStr::from(s),
        Err(_) => {
            let escaped = bytes.escape_ascii().to_string();
            sink.report(
                DiagnosticKind::InvalidText,
                &format!("non-UTF-8 text encountered: {escaped}"),
            );
            ScriptStr::from(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
