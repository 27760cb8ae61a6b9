// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod arena;
pub mod buffer;
pub mod object;

pub use arena::{Arena, ArenaMark};
pub use object::{Kv, Map, Object, SchemaEntry, Tag};

use std::fmt;

/// Maximum nesting depth of an object graph. Claiming and serialization
/// reject anything deeper.
pub const MAX_OBJECT_DEPTH: usize = 10;

/// Error codes shared by all daemons and carried on the wire.
///
/// Success has no variant; it is the `Ok` side of a `Result`. On the wire,
/// zero means success and these are the non-zero codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GgError {
    /// Generic failure.
    Failure = 1,

    /// Out of memory: an arena is exhausted or a fixed table is full.
    Nomem = 2,

    /// The requested entry does not exist (e.g., unknown method).
    NoEntry = 3,

    /// Invalid input or state.
    Invalid = 4,

    /// Data could not be parsed.
    Parse = 5,

    /// The operation is not supported.
    Unsupported = 6,

    /// A value is outside its permitted range.
    Range = 7,

    /// No connection to the peer.
    NoConn = 8,

    /// The call reached the remote end, which returned an error. The
    /// specific remote code is reported separately.
    Remote = 9,

    /// Skip this event and wait for another.
    Retry = 10,

    /// Deliver this event, then close the subscription.
    Expected = 11,

    /// No data was available.
    NoData = 12,

    /// Unrecoverable; the process should exit.
    Fatal = 13,
}

impl GgError {
    /// Wire representation of a result, with 0 meaning success.
    pub fn to_wire(res: Result<(), GgError>) -> u32 {
        match res {
            Ok(()) => 0,
            Err(e) => e as u32,
        }
    }

    /// Decode a wire error code. Unknown codes are reported as `Failure`.
    pub fn from_wire(code: u32) -> Result<(), GgError> {
        match code {
            0 => Ok(()),
            1 => Err(GgError::Failure),
            2 => Err(GgError::Nomem),
            3 => Err(GgError::NoEntry),
            4 => Err(GgError::Invalid),
            5 => Err(GgError::Parse),
            6 => Err(GgError::Unsupported),
            7 => Err(GgError::Range),
            8 => Err(GgError::NoConn),
            9 => Err(GgError::Remote),
            10 => Err(GgError::Retry),
            11 => Err(GgError::Expected),
            12 => Err(GgError::NoData),
            13 => Err(GgError::Fatal),
            _ => Err(GgError::Failure),
        }
    }
}

impl fmt::Display for GgError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Failure => "failure",
                Self::Nomem => "out of memory",
                Self::NoEntry => "no such entry",
                Self::Invalid => "invalid input or state",
                Self::Parse => "parse error",
                Self::Unsupported => "unsupported operation",
                Self::Range => "value out of range",
                Self::NoConn => "no connection",
                Self::Remote => "remote returned an error",
                Self::Retry => "retry requested",
                Self::Expected => "expected close",
                Self::NoData => "no data available",
                Self::Fatal => "fatal error",
            }
        )
    }
}

impl std::error::Error for GgError {}
