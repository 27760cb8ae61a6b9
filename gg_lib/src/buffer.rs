// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Byte-slice utilities used for method names, topics, and config keys.

use crate::GgError;

/// Returns whether `buf` starts with `prefix`.
pub fn has_prefix(buf: &[u8], prefix: &[u8]) -> bool {
    buf.starts_with(prefix)
}

/// Returns whether `buf` ends with `suffix`.
pub fn has_suffix(buf: &[u8], suffix: &[u8]) -> bool {
    buf.ends_with(suffix)
}

/// Advances `buf` past `prefix`. Returns whether the prefix was removed.
pub fn remove_prefix(buf: &mut &[u8], prefix: &[u8]) -> bool {
    match buf.strip_prefix(prefix) {
        Some(rest) => {
            *buf = rest;
            true
        }
        None => false,
    }
}

/// Shortens `buf` by `suffix`. Returns whether the suffix was removed.
pub fn remove_suffix(buf: &mut &[u8], suffix: &[u8]) -> bool {
    match buf.strip_suffix(suffix) {
        Some(rest) => {
            *buf = rest;
            true
        }
        None => false,
    }
}

/// Returns the start index of the first occurrence of `sub` in `buf`.
///
/// An empty `sub` matches at index 0.
pub fn contains(buf: &[u8], sub: &[u8]) -> Option<usize> {
    if sub.is_empty() {
        return Some(0);
    }
    if sub.len() > buf.len() {
        return None;
    }
    buf.windows(sub.len()).position(|window| window == sub)
}

/// Returns the overlap between `start..end` and the bounds of `buf`.
pub fn substr(buf: &[u8], start: usize, end: usize) -> &[u8] {
    let start = start.min(buf.len());
    let end = end.clamp(start, buf.len());
    &buf[start..end]
}

/// Parses a decimal integer, with optional leading sign.
///
/// Returns `Parse` for empty input or non-digit characters, and `Range` if
/// the value does not fit in an i64.
pub fn str_to_int64(buf: &[u8]) -> Result<i64, GgError> {
    let (negative, digits) = match buf.first() {
        None => return Err(GgError::Parse),
        Some(b'-') => (true, &buf[1..]),
        Some(b'+') => (false, &buf[1..]),
        Some(_) => (false, buf),
    };

    if digits.is_empty() {
        return Err(GgError::Parse);
    }

    // Accumulate negative so that i64::MIN parses.
    let mut value: i64 = 0;
    for &c in digits {
        if !c.is_ascii_digit() {
            return Err(GgError::Parse);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub(i64::from(c - b'0')))
            .ok_or(GgError::Range)?;
    }

    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or(GgError::Range)
    }
}
