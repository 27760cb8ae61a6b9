// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Core bus: the local RPC fabric between daemons.
//!
//! Frames are length-delimited over `AF_UNIX` stream sockets. A request is a
//! fixed prelude, the method name, and a TLV-encoded parameter map; a
//! response is a type byte and a length-prefixed body.

pub mod client;
pub mod handle;
pub mod server;
pub mod socket_server;
pub mod sub_response;
pub mod tlv;

pub use handle::Handle;

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gg_lib::{GgError, Map, Object};

/// Maximum clients connected to one bus server at a time.
pub const COREBUS_MAX_CLIENTS: usize = 50;

/// Maximum concurrently open client-side subscriptions per process.
pub const COREBUS_CLIENT_MAX_SUBSCRIPTIONS: usize = 50;

/// Maximum encoded size of a request parameter map or response object.
pub const COREBUS_MAX_MSG_LEN: usize = 10_000;

/// Maximum method name length (fits the one-byte prelude field).
pub const MAX_METHOD_LEN: usize = u8::MAX as usize;

/// Send/receive timeout applied to call connections.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Default directory holding the per-interface sockets.
pub const DEFAULT_SOCKET_DIR: &str = "/run/greengrass";

/// Path of the socket for a bus interface.
pub fn interface_socket_path(socket_dir: &Path, interface: &str) -> PathBuf {
    socket_dir.join(interface)
}

/// The possible errors arising from a bus call or subscription.
#[derive(Debug)]
pub enum Error {
    /// Transport I/O failure (connect, read, write, or timeout).
    Io(std::io::Error),

    /// The call reached the remote handler, which returned this error.
    Remote(GgError),

    /// The peer violated the wire protocol, or the local request could not
    /// be encoded.
    Protocol(GgError),
}

impl Error {
    /// Collapse to a wire error code, for translating into another protocol.
    pub fn code(&self) -> GgError {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => GgError::Failure,
                _ => GgError::NoConn,
            },
            Self::Remote(_) => GgError::Remote,
            Self::Protocol(e) => *e,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Remote(e) => write!(f, "remote error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Request frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Fire-and-forget; no response.
    Notify = 1,
    /// Request-response; exactly one reply.
    Call = 2,
    /// Open a long-lived unicast stream.
    Subscribe = 3,
    /// Client-initiated close of a subscription.
    SubClose = 4,
}

impl FrameKind {
    fn from_u8(kind: u8) -> Option<FrameKind> {
        match kind {
            1 => Some(FrameKind::Notify),
            2 => Some(FrameKind::Call),
            3 => Some(FrameKind::Subscribe),
            4 => Some(FrameKind::SubClose),
            _ => None,
        }
    }
}

/// A decoded request frame. Method and params are kept encoded; params are
/// TLV-decoded into a caller arena at dispatch.
pub(crate) struct Request {
    pub kind: FrameKind,
    pub method: Vec<u8>,
    pub params: Vec<u8>,
}

/// Response frame type byte.
const RESPONSE_OK: u8 = 0;
const RESPONSE_ERR: u8 = 1;
const RESPONSE_ACCEPT: u8 = 2;
const RESPONSE_CLOSE: u8 = 3;

/// A decoded response frame. An `Ok` body is a TLV-encoded object.
pub(crate) enum ResponseFrame {
    Ok(Vec<u8>),
    Err(GgError),
    Accept,
    Close,
}

/// Encode a request frame: prelude, method name, TLV parameter map.
pub(crate) fn encode_request(
    kind: FrameKind,
    method: &[u8],
    params: Map<'_>,
) -> Result<Vec<u8>, GgError> {
    if method.len() > MAX_METHOD_LEN {
        return Err(GgError::Range);
    }

    let mut params_buf = Vec::new();
    tlv::encode_obj(Object::Map(params), &mut params_buf)?;
    if params_buf.len() > COREBUS_MAX_MSG_LEN {
        return Err(GgError::Range);
    }

    let mut buf = Vec::with_capacity(6 + method.len() + params_buf.len());
    buf.push(kind as u8);
    buf.push(method.len() as u8);
    buf.extend_from_slice(&(params_buf.len() as u32).to_le_bytes());
    buf.extend_from_slice(method);
    buf.extend_from_slice(&params_buf);
    Ok(buf)
}

/// Read one request frame from the stream.
pub(crate) fn read_request(stream: &mut impl Read) -> Result<Request, GgError> {
    let mut prelude = [0u8; 6];
    stream.read_exact(&mut prelude).map_err(io_to_gg)?;

    let kind = FrameKind::from_u8(prelude[0]).ok_or(GgError::Parse)?;
    let method_len = prelude[1] as usize;
    let params_len = u32::from_le_bytes([prelude[2], prelude[3], prelude[4], prelude[5]]) as usize;

    if params_len > COREBUS_MAX_MSG_LEN {
        return Err(GgError::Range);
    }

    let mut method = vec![0; method_len];
    stream.read_exact(&mut method).map_err(io_to_gg)?;

    let mut params = vec![0; params_len];
    stream.read_exact(&mut params).map_err(io_to_gg)?;

    Ok(Request {
        kind,
        method,
        params,
    })
}

/// Encode a successful response carrying an object.
pub(crate) fn encode_response_obj(obj: Object<'_>) -> Result<Vec<u8>, GgError> {
    let mut body = Vec::new();
    tlv::encode_obj(obj, &mut body)?;
    if body.len() > COREBUS_MAX_MSG_LEN {
        return Err(GgError::Range);
    }

    let mut buf = Vec::with_capacity(5 + body.len());
    buf.push(RESPONSE_OK);
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Encode an error response.
pub(crate) fn encode_response_err(err: GgError) -> Vec<u8> {
    let code = GgError::to_wire(Err(err)).to_le_bytes();
    let mut buf = Vec::with_capacity(9);
    buf.push(RESPONSE_ERR);
    buf.extend_from_slice(&4u32.to_le_bytes());
    buf.extend_from_slice(&code);
    buf
}

/// Encode a subscription-accepted response.
pub(crate) fn encode_response_accept() -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.push(RESPONSE_ACCEPT);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf
}

/// Encode a server-initiated final frame for a subscription.
pub(crate) fn encode_response_close() -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.push(RESPONSE_CLOSE);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf
}

/// Read one response frame from the stream.
pub(crate) fn read_response(stream: &mut impl Read) -> Result<ResponseFrame, GgError> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).map_err(io_to_gg)?;

    let body_len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if body_len > COREBUS_MAX_MSG_LEN {
        return Err(GgError::Range);
    }

    let mut body = vec![0; body_len];
    stream.read_exact(&mut body).map_err(io_to_gg)?;

    match header[0] {
        RESPONSE_OK => Ok(ResponseFrame::Ok(body)),
        RESPONSE_ERR => {
            if body.len() != 4 {
                return Err(GgError::Parse);
            }
            let code = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
            match GgError::from_wire(code) {
                Ok(()) => Err(GgError::Parse),
                Err(e) => Ok(ResponseFrame::Err(e)),
            }
        }
        RESPONSE_ACCEPT => Ok(ResponseFrame::Accept),
        RESPONSE_CLOSE => Ok(ResponseFrame::Close),
        _ => Err(GgError::Parse),
    }
}

/// Map an I/O failure to a wire error code. Timeouts are reported distinctly
/// from a vanished peer.
pub(crate) fn io_to_gg(e: std::io::Error) -> GgError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => GgError::Failure,
        _ => GgError::NoConn,
    }
}

/// Wrap an I/O result so timeouts surface as `Error::Io`.
pub(crate) fn gg_to_error(e: GgError) -> Error {
    match e {
        GgError::NoConn => Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
        GgError::Failure => Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)),
        other => Error::Protocol(other),
    }
}
