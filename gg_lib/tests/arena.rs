// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use gg_lib::{Arena, GgError, Kv, Map, Object};

#[test]
fn alloc_stays_in_bounds_and_aligned() {
    let mut backing = [0u8; 64];
    let base = backing.as_ptr() as usize;
    let mut arena = Arena::new(&mut backing);

    let a = arena.alloc_raw(1, 1).unwrap();
    assert_eq!(a.as_ptr() as usize, base);

    let b = arena.alloc_raw(8, 8).unwrap();
    assert_eq!((b.as_ptr() as usize) % 8, 0);
    assert!((b.as_ptr() as usize) >= base && (b.as_ptr() as usize) < base + 64);

    assert!(arena.index() <= arena.capacity());
}

#[test]
fn alloc_failure_leaves_arena_unchanged() {
    let mut backing = [0u8; 16];
    let mut arena = Arena::new(&mut backing);

    arena.alloc_bytes(10).unwrap();
    let index = arena.index();

    assert!(arena.alloc_bytes(10).is_none());
    assert_eq!(arena.index(), index);
}

#[test]
fn alloc_rest_consumes_remainder() {
    let mut backing = [0u8; 32];
    let mut arena = Arena::new(&mut backing);

    arena.alloc_bytes(5).unwrap();
    let rest = arena.alloc_rest();
    assert_eq!(rest.len(), 27);
    assert_eq!(arena.index(), arena.capacity());
}

#[test]
fn resize_last_grows_and_shrinks_the_tail() {
    let mut backing = [0u8; 32];
    let mut arena = Arena::new(&mut backing);

    let buf = arena.alloc_bytes(8).unwrap();
    let ptr = buf.as_ptr();

    arena.resize_last(ptr, 8, 16).unwrap();
    assert_eq!(arena.index(), 16);

    arena.resize_last(ptr, 16, 4).unwrap();
    assert_eq!(arena.index(), 4);

    assert_eq!(arena.resize_last(ptr, 4, 1000), Err(GgError::Nomem));
}

#[test]
fn resize_last_rejects_non_tail_pointers() {
    let mut backing = [0u8; 32];
    let mut arena = Arena::new(&mut backing);

    let first = arena.alloc_bytes(8).unwrap().as_ptr();
    arena.alloc_bytes(8).unwrap();

    assert_eq!(arena.resize_last(first, 8, 12), Err(GgError::Invalid));

    let outside = [0u8; 4];
    assert_eq!(
        arena.resize_last(outside.as_ptr(), 4, 2),
        Err(GgError::Invalid)
    );
}

#[test]
fn claim_copies_external_graphs() {
    let payload = *b"hello";
    let items = [Object::Buf(&payload), Object::I64(7)];
    let pairs = [
        Kv::new(b"topic", Object::Buf(b"ping/hello")),
        Kv::new(b"values", Object::List(&items)),
    ];
    let obj = Object::Map(Map::new(&pairs));

    let mut backing = [0u8; 256];
    let mut arena = Arena::new(&mut backing);

    let claimed = arena.claim_obj(obj).unwrap();
    assert_eq!(claimed, obj);

    let map = claimed.into_map();
    assert!(arena.owns(map.pairs.as_ptr().cast()));
    assert!(arena.owns(map.get(b"topic").unwrap().into_buf().as_ptr()));
}

#[test]
fn claim_is_idempotent() {
    let pairs = [Kv::new(b"key", Object::Buf(b"value"))];
    let obj = Object::Map(Map::new(&pairs));

    let mut backing = [0u8; 256];
    let mut arena = Arena::new(&mut backing);

    let first = arena.claim_obj(obj).unwrap();
    let index = arena.index();

    let second = arena.claim_obj(first).unwrap();
    assert_eq!(arena.index(), index);
    assert_eq!(second, first);
}

#[test]
fn failed_claim_recovers_via_mark() {
    let big = [0x5au8; 128];
    let pairs = [
        Kv::new(b"a", Object::Buf(&big)),
        Kv::new(b"b", Object::Buf(&big)),
    ];
    let obj = Object::Map(Map::new(&pairs));

    let mut backing = [0u8; 192];
    let mut arena = Arena::new(&mut backing);

    let mark = arena.mark();
    assert_eq!(arena.claim_obj(obj), Err(GgError::Nomem));

    // SAFETY: nothing claimed after the mark is referenced again.
    unsafe { arena.reset_to(mark) };
    assert_eq!(arena.index(), 0);

    let small = [Kv::new(b"a", Object::Buf(b"fits"))];
    arena.claim_obj(Object::Map(Map::new(&small))).unwrap();
}

#[test]
fn claim_rejects_overdeep_graphs() {
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

    let mut backing = [0u8; 2048];
    let mut arena = Arena::new(&mut backing);

    // Depth 10 is the maximum; this graph is 11 levels deep.
    assert_eq!(
        arena.claim_obj(Object::List(&l10)),
        Err(GgError::Range)
    );

    // One level less claims fine.
    assert!(arena.claim_obj(Object::List(&l9)).is_ok());
}
