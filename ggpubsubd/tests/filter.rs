// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use ggpubsubd::{topic_filter_is_valid, topic_filter_matches};

#[test]
fn exact_filters_match_exactly() {
    assert!(topic_filter_matches(b"ping/hello", b"ping/hello"));
    assert!(!topic_filter_matches(b"ping/hello", b"ping/bye"));
    assert!(!topic_filter_matches(b"ping/hello", b"ping"));
    assert!(!topic_filter_matches(b"ping", b"ping/hello"));
}

#[test]
fn plus_matches_exactly_one_level() {
    assert!(topic_filter_matches(b"sensors/+/temp", b"sensors/kitchen/temp"));
    assert!(topic_filter_matches(b"sensors/+/temp", b"sensors/attic/temp"));
    assert!(!topic_filter_matches(b"sensors/+/temp", b"sensors/temp"));
    assert!(!topic_filter_matches(
        b"sensors/+/temp",
        b"sensors/a/b/temp"
    ));
}

#[test]
fn hash_matches_any_remainder() {
    assert!(topic_filter_matches(b"#", b"logs/app"));
    assert!(topic_filter_matches(b"#", b"a"));
    assert!(topic_filter_matches(b"ping/#", b"ping/hello"));
    assert!(topic_filter_matches(b"ping/#", b"ping/a/b/c"));
    assert!(!topic_filter_matches(b"ping/#", b"pong/hello"));
}

#[test]
fn scenario_table_from_two_subscriptions() {
    // Subscriptions `sensors/+/temp` and `#`: a publish on
    // `sensors/kitchen/temp` fires both, `logs/app` fires only `#`.
    let publish = b"sensors/kitchen/temp";
    assert!(topic_filter_matches(b"sensors/+/temp", publish));
    assert!(topic_filter_matches(b"#", publish));

    let publish = b"logs/app";
    assert!(!topic_filter_matches(b"sensors/+/temp", publish));
    assert!(topic_filter_matches(b"#", publish));
}

#[test]
fn filter_validation() {
    assert!(topic_filter_is_valid(b"ping/hello"));
    assert!(topic_filter_is_valid(b"ping/#"));
    assert!(topic_filter_is_valid(b"+/+/#"));
    assert!(topic_filter_is_valid(b"#"));

    assert!(!topic_filter_is_valid(b""));
    assert!(!topic_filter_is_valid(b"ping/#/pong"));
    assert!(!topic_filter_is_valid(b"ping/he#llo"));
    assert!(!topic_filter_is_valid(b"ping/h+i"));
}
