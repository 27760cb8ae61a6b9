// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Conversion between JSON payloads and the bus object model.

use log::*;
use serde_json::Value;

use gg_lib::{Arena, GgError, Kv, Map, Object, MAX_OBJECT_DEPTH};

/// Build an object graph in `arena` from a JSON value.
///
/// Integral numbers become i64, everything else numeric becomes f64.
pub fn json_to_obj<'m>(value: &Value, arena: &mut Arena<'m>) -> Result<Object<'m>, GgError> {
    json_to_obj_depth(value, arena, MAX_OBJECT_DEPTH)
}

fn json_to_obj_depth<'m>(
    value: &Value,
    arena: &mut Arena<'m>,
    depth: usize,
) -> Result<Object<'m>, GgError> {
    match value {
        Value::Null => Ok(Object::Null),
        Value::Bool(b) => Ok(Object::Bool(*b)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Object::I64(v))
            } else if let Some(v) = n.as_f64() {
                Ok(Object::F64(v))
            } else {
                Err(GgError::Range)
            }
        }
        Value::String(s) => Ok(Object::Buf(arena.claim_bytes(s.as_bytes())?)),
        Value::Array(values) => {
            if depth == 0 {
                error!("JSON document exceeds maximum nesting depth");
                return Err(GgError::Range);
            }
            let items = arena
                .alloc_array::<Object<'m>>(values.len())
                .ok_or(GgError::Nomem)?;
            for (slot, value) in items.iter_mut().zip(values) {
                *slot = json_to_obj_depth(value, arena, depth - 1)?;
            }
            Ok(Object::List(items))
        }
        Value::Object(entries) => {
            if depth == 0 {
                error!("JSON document exceeds maximum nesting depth");
                return Err(GgError::Range);
            }
            let pairs = arena
                .alloc_array::<Kv<'m>>(entries.len())
                .ok_or(GgError::Nomem)?;
            for (slot, (key, value)) in pairs.iter_mut().zip(entries) {
                slot.key = arena.claim_bytes(key.as_bytes())?;
                slot.val = json_to_obj_depth(value, arena, depth - 1)?;
            }
            Ok(Object::Map(Map { pairs }))
        }
    }
}

/// Render an object graph as JSON. Buffers and map keys must be UTF-8;
/// non-finite floats have no JSON form. Either is a `Parse` failure.
pub fn obj_to_json(obj: Object<'_>) -> Result<Value, GgError> {
    match obj {
        Object::Null => Ok(Value::Null),
        Object::Bool(b) => Ok(Value::Bool(b)),
        Object::I64(v) => Ok(Value::from(v)),
        Object::F64(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .ok_or(GgError::Parse),
        Object::Buf(buf) => match std::str::from_utf8(buf) {
            Ok(s) => Ok(Value::String(s.to_owned())),
            Err(_) => {
                warn!("buffer is not UTF-8; cannot encode as JSON");
                Err(GgError::Parse)
            }
        },
        Object::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(obj_to_json(*item)?);
            }
            Ok(Value::Array(values))
        }
        Object::Map(map) => {
            let mut entries = serde_json::Map::new();
            for kv in map.pairs {
                let key = std::str::from_utf8(kv.key).map_err(|_| GgError::Parse)?;
                entries.insert(key.to_owned(), obj_to_json(kv.val)?);
            }
            Ok(Value::Object(entries))
        }
    }
}
