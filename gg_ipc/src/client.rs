// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Component-side IPC client.
//!
//! Connects to the gateway socket, performs the authentication handshake,
//! and exposes unary calls plus multiplexed stream events. Components find
//! the socket path in `AWS_GG_NUCLEUS_DOMAIN_SOCKET_FILEPATH_FOR_COMPONENT`
//! and export the returned SVCUID as `SVCUID` for child tooling.

use std::fmt;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use log::*;
use serde_json::Value;

use core_bus::DEFAULT_TIMEOUT;
use gg_lib::GgError;

use crate::error::IpcErrorCode;
use crate::eventstream::{
    self, Header, APPLICATION_ERROR, APPLICATION_MESSAGE, CONNECT, CONNECT_ACK,
    FLAG_CONNECTION_ACCEPTED, FLAG_TERMINATE_STREAM,
};
use crate::SOCKET_PATH_ENV;

/// Errors a component can hit talking to the gateway.
#[derive(Debug)]
pub enum IpcClientError {
    /// Transport failure.
    Io(std::io::Error),

    /// The gateway violated the framing or handshake protocol.
    Protocol(GgError),

    /// The gateway answered with a public error.
    Service { code: IpcErrorCode, message: String },
}

impl std::error::Error for IpcClientError {}

impl fmt::Display for IpcClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Service { code, message } => write!(f, "{code}: {message}"),
        }
    }
}

impl From<std::io::Error> for IpcClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// One event received on the connection.
#[derive(Debug)]
pub struct IpcEvent {
    pub stream_id: i32,
    /// Set when the server terminated the stream with this message.
    pub terminated: bool,
    pub payload: Value,
    /// Present when the server answered with an application error.
    pub error: Option<(IpcErrorCode, String)>,
}

pub struct IpcClient {
    stream: UnixStream,
    svcuid: String,
    next_stream_id: i32,
}

impl IpcClient {
    /// Connect and authenticate against the gateway at `socket_path`.
    pub fn connect(socket_path: &Path) -> Result<IpcClient, IpcClientError> {
        Self::connect_named(socket_path, None)
    }

    /// Connect with an explicit component name. The name is only honored
    /// by gateways running with authentication disabled.
    pub fn connect_named(
        socket_path: &Path,
        component_name: Option<&str>,
    ) -> Result<IpcClient, IpcClientError> {
        let stream = UnixStream::connect(socket_path)?;
        stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        stream.set_write_timeout(Some(DEFAULT_TIMEOUT))?;

        let mut headers = vec![
            Header::int32(b":message-type", CONNECT),
            Header::int32(b":message-flags", 0),
            Header::int32(b":stream-id", 0),
            Header::int32(b"authenticate", 1),
            Header::string(b":version", b"0.1.0"),
        ];
        if let Some(name) = component_name {
            headers.push(Header::string(b"component-name", name.as_bytes()));
        }

        let frame = eventstream::encode(&headers, b"").map_err(IpcClientError::Protocol)?;
        (&stream).write_all(&frame)?;

        let mut buf = Vec::new();
        let svcuid = {
            let mut reader = &stream;
            let msg = eventstream::read_message(&mut reader, &mut buf)
                .map_err(IpcClientError::Protocol)?;
            let common = msg.common_headers().map_err(IpcClientError::Protocol)?;

            if common.message_type != CONNECT_ACK {
                warn!("connection response was not an ack");
                return Err(IpcClientError::Protocol(GgError::Failure));
            }
            if common.message_flags & FLAG_CONNECTION_ACCEPTED == 0 {
                return Err(IpcClientError::Service {
                    code: IpcErrorCode::UnauthorizedError,
                    message: "connection not accepted".into(),
                });
            }

            let Some(svcuid) = msg.string_header(b"svcuid") else {
                warn!("connect ack is missing the svcuid header");
                return Err(IpcClientError::Protocol(GgError::Failure));
            };
            String::from_utf8_lossy(svcuid).into_owned()
        };

        Ok(IpcClient {
            stream,
            svcuid,
            next_stream_id: 1,
        })
    }

    /// Connect using the socket path from the component environment.
    pub fn connect_env() -> Result<IpcClient, IpcClientError> {
        let path = std::env::var_os(SOCKET_PATH_ENV)
            .ok_or(IpcClientError::Protocol(GgError::NoEntry))?;
        Self::connect(Path::new(&path))
    }

    /// The SVCUID issued during the handshake (16 base64 characters when
    /// authentication is enabled).
    pub fn svcuid(&self) -> &str {
        &self.svcuid
    }

    /// Adjust how long [`IpcClient::recv`] waits for a message.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<(), IpcClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Perform a unary operation and wait for its response.
    pub fn call(&mut self, operation: &str, payload: &Value) -> Result<Value, IpcClientError> {
        let stream_id = self.open_stream(operation, payload)?;

        loop {
            let event = self.recv()?;
            if event.stream_id != stream_id {
                debug!("dropping out-of-band event on stream {}", event.stream_id);
                continue;
            }
            return match event.error {
                None => Ok(event.payload),
                Some((code, message)) => Err(IpcClientError::Service { code, message }),
            };
        }
    }

    /// Open a streaming operation. Returns the stream id once the server
    /// acknowledges it; events arrive via [`IpcClient::recv`].
    pub fn subscribe(&mut self, operation: &str, payload: &Value) -> Result<i32, IpcClientError> {
        let stream_id = self.open_stream(operation, payload)?;

        loop {
            let event = self.recv()?;
            if event.stream_id != stream_id {
                debug!("dropping out-of-band event on stream {}", event.stream_id);
                continue;
            }
            return match event.error {
                None if !event.terminated => Ok(stream_id),
                None => Err(IpcClientError::Protocol(GgError::Failure)),
                Some((code, message)) => Err(IpcClientError::Service { code, message }),
            };
        }
    }

    /// Close one of this connection's streams.
    pub fn terminate_stream(&mut self, stream_id: i32) -> Result<(), IpcClientError> {
        let frame = eventstream::encode(
            &[
                Header::int32(b":message-type", APPLICATION_MESSAGE),
                Header::int32(b":message-flags", FLAG_TERMINATE_STREAM),
                Header::int32(b":stream-id", stream_id),
            ],
            b"",
        )
        .map_err(IpcClientError::Protocol)?;
        (&self.stream).write_all(&frame)?;
        Ok(())
    }

    /// Receive the next event on any stream.
    pub fn recv(&mut self) -> Result<IpcEvent, IpcClientError> {
        let mut buf = Vec::new();
        let mut reader = &self.stream;
        let msg =
            eventstream::read_message(&mut reader, &mut buf).map_err(IpcClientError::Protocol)?;
        let common = msg.common_headers().map_err(IpcClientError::Protocol)?;

        let payload: Value = if msg.payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(msg.payload).unwrap_or(Value::Null)
        };

        match common.message_type {
            APPLICATION_MESSAGE => Ok(IpcEvent {
                stream_id: common.stream_id,
                terminated: common.message_flags & FLAG_TERMINATE_STREAM != 0,
                payload,
                error: None,
            }),
            APPLICATION_ERROR => {
                let code = payload
                    .get("_service")
                    .and_then(Value::as_str)
                    .map(|s| IpcErrorCode::from_err_str(s.as_bytes()))
                    .unwrap_or(IpcErrorCode::ServiceError);
                let message = payload
                    .get("_message")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned();
                Ok(IpcEvent {
                    stream_id: common.stream_id,
                    terminated: true,
                    payload,
                    error: Some((code, message)),
                })
            }
            other => {
                warn!("unexpected message type {other}");
                Err(IpcClientError::Protocol(GgError::Invalid))
            }
        }
    }

    fn open_stream(&mut self, operation: &str, payload: &Value) -> Result<i32, IpcClientError> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;

        let body = serde_json::to_vec(payload).map_err(|_| {
            IpcClientError::Protocol(GgError::Parse)
        })?;
        let frame = eventstream::encode(
            &[
                Header::int32(b":message-type", APPLICATION_MESSAGE),
                Header::int32(b":message-flags", 0),
                Header::int32(b":stream-id", stream_id),
                Header::string(b"operation", operation.as_bytes()),
            ],
            &body,
        )
        .map_err(IpcClientError::Protocol)?;
        (&self.stream).write_all(&frame)?;
        Ok(stream_id)
    }
}
