// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The dynamic object model: a tagged value tree borrowing its backing
//! memory, used as the universal RPC payload.

use log::*;

use crate::GgError;

/// One-byte type tag for [`Object`]. Also the TLV wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Null = 0,
    Bool = 1,
    I64 = 2,
    F64 = 3,
    Buf = 4,
    List = 5,
    Map = 6,
}

impl Tag {
    pub fn from_u8(tag: u8) -> Option<Tag> {
        match tag {
            0 => Some(Tag::Null),
            1 => Some(Tag::Bool),
            2 => Some(Tag::I64),
            3 => Some(Tag::F64),
            4 => Some(Tag::Buf),
            5 => Some(Tag::List),
            6 => Some(Tag::Map),
            _ => None,
        }
    }
}

/// A dynamic value. The container variants borrow their storage, so an
/// `Object` is a cheap `Copy` view; ownership is established by claiming
/// the graph into an [`crate::Arena`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Object<'a> {
    #[default]
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Buf(&'a [u8]),
    List(&'a [Object<'a>]),
    Map(Map<'a>),
}

/// An insertion-ordered sequence of key/value pairs. Keys are case-sensitive
/// UTF-8; lookup is linear. Producers are responsible for keeping keys
/// unique.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Map<'a> {
    pub pairs: &'a [Kv<'a>],
}

/// A key/value pair in a [`Map`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Kv<'a> {
    pub key: &'a [u8],
    pub val: Object<'a>,
}

impl<'a> Kv<'a> {
    pub const fn new(key: &'a [u8], val: Object<'a>) -> Self {
        Kv { key, val }
    }
}

impl<'a> Object<'a> {
    pub fn tag(&self) -> Tag {
        match self {
            Object::Null => Tag::Null,
            Object::Bool(_) => Tag::Bool,
            Object::I64(_) => Tag::I64,
            Object::F64(_) => Tag::F64,
            Object::Buf(_) => Tag::Buf,
            Object::List(_) => Tag::List,
            Object::Map(_) => Tag::Map,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Object::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            Object::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_buf(self) -> Option<&'a [u8]> {
        match self {
            Object::Buf(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(self) -> Option<&'a [Object<'a>]> {
        match self {
            Object::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(self) -> Option<Map<'a>> {
        match self {
            Object::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Unwraps a bool. Panics if the object is any other type; calling this
    /// without having checked the tag is a programmer error.
    pub fn into_bool(self) -> bool {
        match self {
            Object::Bool(b) => b,
            other => panic!("object is {:?}, not a bool", other.tag()),
        }
    }

    /// Unwraps an i64. Panics on any other type.
    pub fn into_i64(self) -> i64 {
        match self {
            Object::I64(v) => v,
            other => panic!("object is {:?}, not an i64", other.tag()),
        }
    }

    /// Unwraps an f64. Panics on any other type.
    pub fn into_f64(self) -> f64 {
        match self {
            Object::F64(v) => v,
            other => panic!("object is {:?}, not an f64", other.tag()),
        }
    }

    /// Unwraps a buffer. Panics on any other type.
    pub fn into_buf(self) -> &'a [u8] {
        match self {
            Object::Buf(b) => b,
            other => panic!("object is {:?}, not a buffer", other.tag()),
        }
    }

    /// Unwraps a list. Panics on any other type.
    pub fn into_list(self) -> &'a [Object<'a>] {
        match self {
            Object::List(items) => items,
            other => panic!("object is {:?}, not a list", other.tag()),
        }
    }

    /// Unwraps a map. Panics on any other type.
    pub fn into_map(self) -> Map<'a> {
        match self {
            Object::Map(map) => map,
            other => panic!("object is {:?}, not a map", other.tag()),
        }
    }
}

/// One entry of a [`Map::validate`] schema.
pub struct SchemaEntry<'k> {
    pub key: &'k [u8],
    pub required: bool,
    /// Expected type, or `None` to accept any type.
    pub typ: Option<Tag>,
}

impl<'k> SchemaEntry<'k> {
    pub const fn required(key: &'k [u8], typ: Tag) -> Self {
        SchemaEntry {
            key,
            required: true,
            typ: Some(typ),
        }
    }

    pub const fn optional(key: &'k [u8], typ: Tag) -> Self {
        SchemaEntry {
            key,
            required: false,
            typ: Some(typ),
        }
    }
}

impl<'a> Map<'a> {
    pub const fn new(pairs: &'a [Kv<'a>]) -> Self {
        Map { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Get the value for a key. Linear scan, case-sensitive.
    pub fn get(&self, key: &[u8]) -> Option<Object<'a>> {
        self.pairs.iter().find(|kv| kv.key == key).map(|kv| kv.val)
    }

    /// Check a map against a schema, returning the found values in schema
    /// order.
    ///
    /// A required key that is absent fails with `NoEntry`; a present key of
    /// the wrong type fails with `Parse`; an absent optional key yields
    /// `None` in its slot.
    pub fn validate<const N: usize>(
        &self,
        schema: [SchemaEntry<'_>; N],
    ) -> Result<[Option<Object<'a>>; N], GgError> {
        let mut found = [None; N];

        for (slot, entry) in found.iter_mut().zip(&schema) {
            match self.get(entry.key) {
                None => {
                    if entry.required {
                        error!(
                            "map missing required key {}",
                            String::from_utf8_lossy(entry.key)
                        );
                        return Err(GgError::NoEntry);
                    }
                }
                Some(val) => {
                    if let Some(typ) = entry.typ {
                        if val.tag() != typ {
                            error!(
                                "map key {} has type {:?}, expected {:?}",
                                String::from_utf8_lossy(entry.key),
                                val.tag(),
                                typ
                            );
                            return Err(GgError::Parse);
                        }
                    }
                    *slot = Some(val);
                }
            }
        }

        Ok(found)
    }
}
