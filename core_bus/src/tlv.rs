// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The compact tag-length-value encoding used for bus payloads.
//!
//! One tag byte, then per type: nothing (null), one byte (bool), 8 bytes
//! little-endian (i64/f64), or a u32 length/count followed by contents
//! (buffer, list, map). Map pairs are a u32 key length, the key bytes, and
//! the encoded value.

use gg_lib::{Arena, GgError, Kv, Map, Object, Tag, MAX_OBJECT_DEPTH};

/// Append the encoding of `obj` to `out`.
///
/// Fails with `Range` for graphs nested deeper than [`MAX_OBJECT_DEPTH`] or
/// with containers too large for their u32 length fields.
pub fn encode_obj(obj: Object<'_>, out: &mut Vec<u8>) -> Result<(), GgError> {
    encode_depth(obj, out, MAX_OBJECT_DEPTH)
}

fn encode_depth(obj: Object<'_>, out: &mut Vec<u8>, depth: usize) -> Result<(), GgError> {
    out.push(obj.tag() as u8);

    match obj {
        Object::Null => {}
        Object::Bool(b) => out.push(b as u8),
        Object::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Object::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Object::Buf(buf) => {
            out.extend_from_slice(&encode_len(buf.len())?);
            out.extend_from_slice(buf);
        }
        Object::List(items) => {
            if depth == 0 {
                return Err(GgError::Range);
            }
            out.extend_from_slice(&encode_len(items.len())?);
            for item in items {
                encode_depth(*item, out, depth - 1)?;
            }
        }
        Object::Map(map) => {
            if depth == 0 {
                return Err(GgError::Range);
            }
            out.extend_from_slice(&encode_len(map.pairs.len())?);
            for kv in map.pairs {
                out.extend_from_slice(&encode_len(kv.key.len())?);
                out.extend_from_slice(kv.key);
                encode_depth(kv.val, out, depth - 1)?;
            }
        }
    }

    Ok(())
}

fn encode_len(len: usize) -> Result<[u8; 4], GgError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| GgError::Range)
}

/// Decode one object, advancing `input` past it. Decoded containers and
/// buffers are allocated from `arena`.
pub fn decode_obj<'m>(input: &mut &[u8], arena: &mut Arena<'m>) -> Result<Object<'m>, GgError> {
    decode_depth(input, arena, MAX_OBJECT_DEPTH)
}

/// Decode one object and require it to be a map.
pub fn decode_map<'m>(input: &mut &[u8], arena: &mut Arena<'m>) -> Result<Map<'m>, GgError> {
    match decode_obj(input, arena)? {
        Object::Map(map) => Ok(map),
        _ => Err(GgError::Parse),
    }
}

fn decode_depth<'m>(
    input: &mut &[u8],
    arena: &mut Arena<'m>,
    depth: usize,
) -> Result<Object<'m>, GgError> {
    let tag = take(input, 1)?[0];
    let tag = Tag::from_u8(tag).ok_or(GgError::Parse)?;

    match tag {
        Tag::Null => Ok(Object::Null),
        Tag::Bool => match take(input, 1)?[0] {
            0 => Ok(Object::Bool(false)),
            1 => Ok(Object::Bool(true)),
            _ => Err(GgError::Parse),
        },
        Tag::I64 => {
            let bytes: [u8; 8] = take(input, 8)?.try_into().map_err(|_| GgError::Parse)?;
            Ok(Object::I64(i64::from_le_bytes(bytes)))
        }
        Tag::F64 => {
            let bytes: [u8; 8] = take(input, 8)?.try_into().map_err(|_| GgError::Parse)?;
            Ok(Object::F64(f64::from_le_bytes(bytes)))
        }
        Tag::Buf => {
            let len = take_u32(input)? as usize;
            let bytes = take(input, len)?;
            Ok(Object::Buf(arena.claim_bytes(bytes)?))
        }
        Tag::List => {
            if depth == 0 {
                return Err(GgError::Range);
            }
            let count = take_u32(input)? as usize;
            let items = arena.alloc_array::<Object<'m>>(count).ok_or(GgError::Nomem)?;
            for slot in items.iter_mut() {
                *slot = decode_depth(input, arena, depth - 1)?;
            }
            Ok(Object::List(items))
        }
        Tag::Map => {
            if depth == 0 {
                return Err(GgError::Range);
            }
            let count = take_u32(input)? as usize;
            let pairs = arena.alloc_array::<Kv<'m>>(count).ok_or(GgError::Nomem)?;
            for slot in pairs.iter_mut() {
                let key_len = take_u32(input)? as usize;
                let key = take(input, key_len)?;
                slot.key = arena.claim_bytes(key)?;
                slot.val = decode_depth(input, arena, depth - 1)?;
            }
            Ok(Object::Map(Map { pairs }))
        }
    }
}

fn take<'b>(input: &mut &'b [u8], n: usize) -> Result<&'b [u8], GgError> {
    if input.len() < n {
        return Err(GgError::Parse);
    }
    let (taken, rest) = input.split_at(n);
    *input = rest;
    Ok(taken)
}

fn take_u32(input: &mut &[u8]) -> Result<u32, GgError> {
    let bytes = take(input, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
