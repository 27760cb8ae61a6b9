// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use gg_lib::{GgError, Kv, Map, Object, SchemaEntry, Tag};

fn sample_pairs() -> [Kv<'static>; 3] {
    [
        Kv::new(b"topic", Object::Buf(b"ping/hello")),
        Kv::new(b"qos", Object::I64(1)),
        Kv::new(b"retain", Object::Bool(false)),
    ]
}

#[test]
fn map_get_finds_exactly_the_present_keys() {
    let pairs = sample_pairs();
    let map = Map::new(&pairs);

    for kv in &pairs {
        assert_eq!(map.get(kv.key), Some(kv.val));
    }

    assert_eq!(map.get(b"payload"), None);
    // Keys are case-sensitive.
    assert_eq!(map.get(b"Topic"), None);
}

#[test]
fn validate_populates_slots_in_schema_order() {
    let pairs = sample_pairs();
    let map = Map::new(&pairs);

    let [topic, qos, payload] = map
        .validate([
            SchemaEntry::required(b"topic", Tag::Buf),
            SchemaEntry::required(b"qos", Tag::I64),
            SchemaEntry::optional(b"payload", Tag::Buf),
        ])
        .unwrap();

    assert_eq!(topic.unwrap().into_buf(), b"ping/hello");
    assert_eq!(qos.unwrap().into_i64(), 1);
    assert!(payload.is_none());
}

#[test]
fn validate_rejects_missing_required_key() {
    let pairs = sample_pairs();
    let map = Map::new(&pairs);

    let res = map.validate([SchemaEntry::required(b"payload", Tag::Buf)]);
    assert_eq!(res.unwrap_err(), GgError::NoEntry);
}

#[test]
fn validate_rejects_wrong_type() {
    let pairs = sample_pairs();
    let map = Map::new(&pairs);

    let res = map.validate([SchemaEntry::required(b"qos", Tag::Buf)]);
    assert_eq!(res.unwrap_err(), GgError::Parse);
}

#[test]
fn validate_accepts_any_type_when_unconstrained() {
    let pairs = sample_pairs();
    let map = Map::new(&pairs);

    let [qos] = map
        .validate([SchemaEntry {
            key: b"qos",
            required: true,
            typ: None,
        }])
        .unwrap();
    assert_eq!(qos.unwrap().tag(), Tag::I64);
}

#[test]
fn tags_round_trip_through_u8() {
    for tag in [
        Tag::Null,
        Tag::Bool,
        Tag::I64,
        Tag::F64,
        Tag::Buf,
        Tag::List,
        Tag::Map,
    ] {
        assert_eq!(Tag::from_u8(tag as u8), Some(tag));
    }
    assert_eq!(Tag::from_u8(7), None);
}

#[test]
fn accessors_match_tags() {
    let obj = Object::I64(17);
    assert_eq!(obj.as_i64(), Some(17));
    assert_eq!(obj.as_buf(), None);
    assert_eq!(obj.into_i64(), 17);
}

#[test]
#[should_panic(expected = "not a buffer")]
fn into_buf_panics_on_mismatch() {
    Object::I64(17).into_buf();
}
