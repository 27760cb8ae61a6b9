// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use core_bus::tlv::{decode_obj, encode_obj};
use gg_lib::{Arena, GgError, Kv, Map, Object};

fn round_trip(obj: Object<'_>) {
    let mut encoded = Vec::new();
    encode_obj(obj, &mut encoded).unwrap();

    let mut mem = vec![0u8; 4096];
    let mut arena = Arena::new(&mut mem);
    let mut input = encoded.as_slice();
    let decoded = decode_obj(&mut input, &mut arena).unwrap();

    assert_eq!(decoded, obj);
    assert!(input.is_empty(), "decoder left trailing bytes");
}

#[test]
fn scalars_round_trip() {
    round_trip(Object::Null);
    round_trip(Object::Bool(true));
    round_trip(Object::Bool(false));
    round_trip(Object::I64(-1));
    round_trip(Object::I64(i64::MAX));
    round_trip(Object::F64(1.5));
    round_trip(Object::Buf(b""));
    round_trip(Object::Buf(b"payload bytes"));
}

#[test]
fn nested_containers_round_trip() {
    let inner_pairs = [
        Kv::new(b"qos", Object::I64(1)),
        Kv::new(b"retain", Object::Bool(false)),
    ];
    let items = [
        Object::Buf(b"ping/hello"),
        Object::Map(Map::new(&inner_pairs)),
        Object::Null,
    ];
    let pairs = [
        Kv::new(b"topic", Object::Buf(b"ping/hello")),
        Kv::new(b"meta", Object::List(&items)),
    ];
    round_trip(Object::Map(Map::new(&pairs)));
}

#[test]
fn empty_containers_round_trip() {
    round_trip(Object::List(&[]));
    round_trip(Object::Map(Map::new(&[])));
}

#[test]
fn truncated_input_is_a_parse_error() {
    let pairs = [Kv::new(b"topic", Object::Buf(b"ping/hello"))];
    let mut encoded = Vec::new();
    encode_obj(Object::Map(Map::new(&pairs)), &mut encoded).unwrap();

    for len in 0..encoded.len() {
        let mut mem = vec![0u8; 4096];
        let mut arena = Arena::new(&mut mem);
        let mut input = &encoded[..len];
        assert_eq!(
            decode_obj(&mut input, &mut arena),
            Err(GgError::Parse),
            "prefix of {len} bytes should not decode"
        );
    }
}

#[test]
fn unknown_tag_is_a_parse_error() {
    let mut mem = vec![0u8; 64];
    let mut arena = Arena::new(&mut mem);
    let mut input: &[u8] = &[0xff];
    assert_eq!(decode_obj(&mut input, &mut arena), Err(GgError::Parse));
}

#[test]
fn bad_bool_byte_is_a_parse_error() {
    let mut mem = vec![0u8; 64];
    let mut arena = Arena::new(&mut mem);
    let mut input: &[u8] = &[1, 2];
    assert_eq!(decode_obj(&mut input, &mut arena), Err(GgError::Parse));
}

#[test]
fn overdeep_encode_is_rejected() {
    let l0 = [Object::Null];
    let l1 = [Object::List(&l0)];
    let l2 = [Object::List(&l1)];
    let l3 = [Object::List(&l2)];
    let l4 = [Object::List(&l3)];
    let l5 = [Object::List(&l4)];
    let l6 = [Object::List(&l5)];
    let l7 = [Object::List(&l6)];
    let l8 = [Object::List(&l7)];
    let l9 = [Object::List(&l8)];
    let l10 = [Object::List(&l9)];

    let mut out = Vec::new();
    assert_eq!(
        encode_obj(Object::List(&l10), &mut out),
        Err(GgError::Range)
    );

    out.clear();
    encode_obj(Object::List(&l9), &mut out).unwrap();
}

#[test]
fn overdeep_decode_is_rejected() {
    // Eleven nested single-element lists around a null.
    let mut encoded = Vec::new();
    for _ in 0..11 {
        encoded.push(5);
        encoded.extend_from_slice(&1u32.to_le_bytes());
    }
    encoded.push(0);

    let mut mem = vec![0u8; 4096];
    let mut arena = Arena::new(&mut mem);
    let mut input = encoded.as_slice();
    assert_eq!(decode_obj(&mut input, &mut arena), Err(GgError::Range));
}

#[test]
fn decoded_graph_lives_in_the_arena() {
    let pairs = [Kv::new(b"payload", Object::Buf(b"Hi"))];
    let mut encoded = Vec::new();
    encode_obj(Object::Map(Map::new(&pairs)), &mut encoded).unwrap();

    let mut mem = vec![0u8; 4096];
    let mut arena = Arena::new(&mut mem);
    let mut input = encoded.as_slice();
    let decoded = decode_obj(&mut input, &mut arena).unwrap();

    let map = decoded.into_map();
    assert!(arena.owns(map.pairs.as_ptr().cast()));
    assert!(arena.owns(map.get(b"payload").unwrap().into_buf().as_ptr()));
}
