// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use gg_lib::buffer::*;
use gg_lib::GgError;

#[test]
fn prefix_and_suffix_checks() {
    assert!(has_prefix(b"ggl.sample.service", b"ggl."));
    assert!(!has_prefix(b"sample", b"ggl."));
    assert!(has_suffix(b"sample.service", b".service"));
    assert!(!has_suffix(b"sample.socket", b".service"));
}

#[test]
fn remove_prefix_advances_only_on_match() {
    let mut name: &[u8] = b"ggl.sample";
    assert!(remove_prefix(&mut name, b"ggl."));
    assert_eq!(name, b"sample");

    assert!(!remove_prefix(&mut name, b"ggl."));
    assert_eq!(name, b"sample");
}

#[test]
fn remove_suffix_shortens_only_on_match() {
    let mut name: &[u8] = b"sample.service";
    assert!(remove_suffix(&mut name, b".service"));
    assert_eq!(name, b"sample");

    assert!(!remove_suffix(&mut name, b".service"));
    assert_eq!(name, b"sample");
}

#[test]
fn contains_reports_first_match() {
    assert_eq!(contains(b"sensors/kitchen/temp", b"/kitchen/"), Some(7));
    assert_eq!(contains(b"sensors", b"kitchen"), None);
    assert_eq!(contains(b"abc", b""), Some(0));
    assert_eq!(contains(b"ab", b"abc"), None);
}

#[test]
fn substr_clamps_to_bounds() {
    let buf = b"greengrass";
    assert_eq!(substr(buf, 0, 5), b"green");
    assert_eq!(substr(buf, 5, 100), b"grass");
    assert_eq!(substr(buf, 100, 200), b"");
    assert_eq!(substr(buf, 7, 3), b"");

    // has_prefix(a, b) iff substr(a, 0, b.len()) == b
    let prefix = b"green";
    assert_eq!(
        has_prefix(buf, prefix),
        substr(buf, 0, prefix.len()) == prefix
    );
}

#[test]
fn str_to_int64_parses_signed_decimals() {
    assert_eq!(str_to_int64(b"0"), Ok(0));
    assert_eq!(str_to_int64(b"17"), Ok(17));
    assert_eq!(str_to_int64(b"-42"), Ok(-42));
    assert_eq!(str_to_int64(b"+9"), Ok(9));
    assert_eq!(str_to_int64(b"9223372036854775807"), Ok(i64::MAX));
    assert_eq!(str_to_int64(b"-9223372036854775808"), Ok(i64::MIN));
}

#[test]
fn str_to_int64_rejects_junk_and_overflow() {
    assert_eq!(str_to_int64(b""), Err(GgError::Parse));
    assert_eq!(str_to_int64(b"-"), Err(GgError::Parse));
    assert_eq!(str_to_int64(b"12x"), Err(GgError::Parse));
    assert_eq!(str_to_int64(b" 1"), Err(GgError::Parse));
    assert_eq!(str_to_int64(b"9223372036854775808"), Err(GgError::Range));
}
