// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Event-stream framing.
//!
//! Every message is a 12-byte prelude (`total_length`, `headers_length`,
//! `prelude_crc32`, all big-endian u32), a header block, an opaque payload
//! (JSON by convention), and a trailing CRC32 over everything before it.
//! CRCs use the IEEE polynomial. Recognized header value types are int32
//! (tag 4) and string (tag 7).

use std::io::Read;

use log::*;

use gg_lib::GgError;

/// Maximum total size of one event-stream message.
pub const IPC_MAX_MSG_LEN: usize = 10_000;

pub const PRELUDE_LEN: usize = 12;

/// `:message-type` values, matching the eventstream RPC constants.
pub const APPLICATION_MESSAGE: i32 = 0;
pub const APPLICATION_ERROR: i32 = 1;
pub const CONNECT: i32 = 4;
pub const CONNECT_ACK: i32 = 5;

/// `:message-flags` bits.
pub const FLAG_CONNECTION_ACCEPTED: i32 = 1;
pub const FLAG_TERMINATE_STREAM: i32 = 2;

const HEADER_TYPE_INT32: u8 = 4;
const HEADER_TYPE_STRING: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaderValue<'a> {
    Int32(i32),
    String(&'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header<'a> {
    pub name: &'a [u8],
    pub value: HeaderValue<'a>,
}

impl<'a> Header<'a> {
    pub const fn int32(name: &'a [u8], value: i32) -> Self {
        Header {
            name,
            value: HeaderValue::Int32(value),
        }
    }

    pub const fn string(name: &'a [u8], value: &'a [u8]) -> Self {
        Header {
            name,
            value: HeaderValue::String(value),
        }
    }
}

/// A decoded message borrowing the receive buffer.
#[derive(Debug)]
pub struct Message<'a> {
    pub headers: Vec<Header<'a>>,
    pub payload: &'a [u8],
}

/// The `:message-type` / `:message-flags` / `:stream-id` headers every
/// message must carry.
#[derive(Debug, Clone, Copy)]
pub struct CommonHeaders {
    pub message_type: i32,
    pub message_flags: i32,
    pub stream_id: i32,
}

impl Message<'_> {
    pub fn header(&self, name: &[u8]) -> Option<&HeaderValue<'_>> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| &h.value)
    }

    pub fn string_header(&self, name: &[u8]) -> Option<&[u8]> {
        match self.header(name) {
            Some(HeaderValue::String(s)) => Some(*s),
            _ => None,
        }
    }

    pub fn int32_header(&self, name: &[u8]) -> Option<i32> {
        match self.header(name) {
            Some(HeaderValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn common_headers(&self) -> Result<CommonHeaders, GgError> {
        let message_type = self.int32_header(b":message-type");
        let message_flags = self.int32_header(b":message-flags");
        let stream_id = self.int32_header(b":stream-id");

        match (message_type, message_flags, stream_id) {
            (Some(message_type), Some(message_flags), Some(stream_id)) => Ok(CommonHeaders {
                message_type,
                message_flags,
                stream_id,
            }),
            _ => {
                warn!("message is missing a required common header");
                Err(GgError::Parse)
            }
        }
    }
}

/// Encode one message.
pub fn encode(headers: &[Header<'_>], payload: &[u8]) -> Result<Vec<u8>, GgError> {
    let mut header_block = Vec::new();
    for header in headers {
        let name_len = u8::try_from(header.name.len()).map_err(|_| GgError::Range)?;
        header_block.push(name_len);
        header_block.extend_from_slice(header.name);
        match header.value {
            HeaderValue::Int32(v) => {
                header_block.push(HEADER_TYPE_INT32);
                header_block.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::String(s) => {
                let len = u16::try_from(s.len()).map_err(|_| GgError::Range)?;
                header_block.push(HEADER_TYPE_STRING);
                header_block.extend_from_slice(&len.to_be_bytes());
                header_block.extend_from_slice(s);
            }
        }
    }

    let total_len = PRELUDE_LEN + header_block.len() + payload.len() + 4;
    if total_len > IPC_MAX_MSG_LEN {
        warn!("message does not fit in the maximum packet size");
        return Err(GgError::Nomem);
    }

    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(&(total_len as u32).to_be_bytes());
    buf.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&prelude_crc.to_be_bytes());

    buf.extend_from_slice(&header_block);
    buf.extend_from_slice(payload);

    let message_crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&message_crc.to_be_bytes());

    Ok(buf)
}

/// A validated prelude. `data_len` is what remains to be read after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prelude {
    pub total_len: usize,
    pub headers_len: usize,
}

impl Prelude {
    pub fn data_len(&self) -> usize {
        self.total_len - PRELUDE_LEN
    }
}

/// Decode and CRC-check a prelude.
pub fn decode_prelude(bytes: &[u8; PRELUDE_LEN]) -> Result<Prelude, GgError> {
    let total_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let headers_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let prelude_crc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

    if crc32fast::hash(&bytes[..8]) != prelude_crc {
        warn!("prelude CRC mismatch");
        return Err(GgError::Parse);
    }

    if total_len < PRELUDE_LEN + 4 || headers_len > total_len - PRELUDE_LEN - 4 {
        warn!("prelude lengths are inconsistent");
        return Err(GgError::Parse);
    }

    Ok(Prelude {
        total_len,
        headers_len,
    })
}

/// Decode the body of a message: `data` holds everything after the prelude
/// (headers, payload, trailing CRC).
pub fn decode<'a>(
    prelude: &Prelude,
    prelude_bytes: &[u8; PRELUDE_LEN],
    data: &'a [u8],
) -> Result<Message<'a>, GgError> {
    if data.len() != prelude.data_len() {
        return Err(GgError::Parse);
    }

    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let message_crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(prelude_bytes);
    hasher.update(body);
    if hasher.finalize() != message_crc {
        warn!("message CRC mismatch");
        return Err(GgError::Parse);
    }

    let (mut header_block, payload) = body.split_at(prelude.headers_len);

    let mut headers = Vec::new();
    while !header_block.is_empty() {
        headers.push(decode_header(&mut header_block)?);
    }

    Ok(Message { headers, payload })
}

fn decode_header<'a>(input: &mut &'a [u8]) -> Result<Header<'a>, GgError> {
    let name_len = take(input, 1)?[0] as usize;
    let name = take(input, name_len)?;
    let value_type = take(input, 1)?[0];

    let value = match value_type {
        HEADER_TYPE_INT32 => {
            let bytes = take(input, 4)?;
            HeaderValue::Int32(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        HEADER_TYPE_STRING => {
            let len_bytes = take(input, 2)?;
            let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
            HeaderValue::String(take(input, len)?)
        }
        other => {
            warn!("unrecognized header value type {other}");
            return Err(GgError::Parse);
        }
    };

    Ok(Header { name, value })
}

fn take<'b>(input: &mut &'b [u8], n: usize) -> Result<&'b [u8], GgError> {
    if input.len() < n {
        return Err(GgError::Parse);
    }
    let (taken, rest) = input.split_at(n);
    *input = rest;
    Ok(taken)
}

/// Read one full message from a stream into `buf`, and decode it.
pub fn read_message<'b>(
    stream: &mut impl Read,
    buf: &'b mut Vec<u8>,
) -> Result<Message<'b>, GgError> {
    let mut prelude_bytes = [0u8; PRELUDE_LEN];
    stream.read_exact(&mut prelude_bytes).map_err(io_to_gg)?;

    let prelude = decode_prelude(&prelude_bytes)?;

    if prelude.total_len > IPC_MAX_MSG_LEN {
        warn!("message does not fit in the maximum packet size");
        return Err(GgError::Nomem);
    }

    buf.clear();
    buf.resize(prelude.data_len(), 0);
    stream.read_exact(buf).map_err(io_to_gg)?;

    decode(&prelude, &prelude_bytes, buf)
}

fn io_to_gg(e: std::io::Error) -> GgError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => GgError::Failure,
        _ => GgError::NoConn,
    }
}
