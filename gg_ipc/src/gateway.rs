// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The `ggipcd` gateway: accepts authenticated component connections over
//! event-stream framing and translates operations onto the bus.
//!
//! One connection per component carries any number of streams, each named
//! by a positive stream id. Stream id 0 is reserved for the connect
//! handshake. Unary operations answer on the request's stream id and
//! terminate it; streaming operations keep it open and forward bus
//! subscription events until either side ends the stream.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::*;
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use serde_json::Value;

use core_bus::client as bus_client;
use core_bus::server::{self as bus_server, Conns, MethodDesc};
use core_bus::socket_server::{socket_server_listen, ClientHooks};
use core_bus::{Error as BusError, Handle, COREBUS_MAX_MSG_LEN};
use gg_lib::{Arena, GgError, Map, Object, SchemaEntry, Tag};

use crate::auth::{self, ComponentHandle};
use crate::error::IpcErrorCode;
use crate::eventstream::{
    self, CommonHeaders, Header, Message, APPLICATION_ERROR, APPLICATION_MESSAGE, CONNECT,
    CONNECT_ACK, FLAG_CONNECTION_ACCEPTED, FLAG_TERMINATE_STREAM,
};
use crate::json::{json_to_obj, obj_to_json};
use crate::operations::{self, OpDesc};
use crate::GG_IPC_SOCKET_NAME;

/// Maximum concurrently connected components.
pub const IPC_MAX_CLIENTS: usize = 50;

pub struct GatewayConfig {
    pub socket_dir: PathBuf,
    pub insecure_auth: bool,
}

/// Run the gateway. Only returns on a fatal server error.
pub fn run_ggipcd(config: GatewayConfig) -> BusError {
    if config.insecure_auth {
        auth::set_insecure_mode();
    }

    // Serve `ipc_component` so other daemons can check presented SVCUIDs.
    let component_dir = config.socket_dir.clone();
    thread::spawn(move || {
        let err = bus_server::listen(&component_dir, "ipc_component", VERIFY_HANDLERS, ());
        error!("ipc_component server exited: {err:?}");
    });

    let path = config.socket_dir.join(GG_IPC_SOCKET_NAME);
    let mut gateway = Gateway {
        socket_dir: config.socket_dir,
        clients: (0..IPC_MAX_CLIENTS).map(|_| ClientSlot::default()).collect(),
    };

    match socket_server_listen(&path, &mut gateway) {
        Ok(never) => match never {},
        Err(e) => BusError::Protocol(e),
    }
}

const VERIFY_HANDLERS: &[MethodDesc<()>] = &[MethodDesc {
    name: "verify_svcuid",
    is_subscription: false,
    handler: rpc_verify_svcuid,
}];

fn rpc_verify_svcuid(_state: &mut (), conns: &mut Conns<()>, params: Map<'_>, handle: Handle) {
    match params.validate([SchemaEntry::required(b"svcuid", Tag::Buf)]) {
        Ok([Some(svcuid)]) => {
            let known = auth::verify_svcuid(svcuid.into_buf());
            conns.respond(handle, Object::Bool(known));
        }
        _ => conns.return_err(handle, GgError::Invalid),
    }
}

#[derive(Default)]
struct ClientSlot {
    read: Option<UnixStream>,
    conn: Option<Arc<IpcConn>>,
}

struct Gateway {
    socket_dir: PathBuf,
    clients: Vec<ClientSlot>,
}

struct ActiveStream {
    stream_id: i32,
    cancel: Arc<AtomicBool>,
}

struct IpcConn {
    write: Mutex<UnixStream>,
    component: Mutex<Option<ComponentHandle>>,
    streams: Mutex<Vec<ActiveStream>>,
}

impl IpcConn {
    fn send(&self, frame: &[u8]) {
        let mut stream = self.write.lock().unwrap();
        if let Err(e) = stream.write_all(frame) {
            warn!("dropping IPC frame: {e}");
        }
    }

    fn send_message(&self, headers: &[Header<'_>], payload: &[u8]) {
        match eventstream::encode(headers, payload) {
            Ok(frame) => self.send(&frame),
            Err(e) => error!("failed to encode IPC message: {e}"),
        }
    }

    fn component(&self) -> Option<ComponentHandle> {
        *self.component.lock().unwrap()
    }

    fn stream_active(&self, stream_id: i32) -> bool {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.stream_id == stream_id)
    }

    fn add_stream(&self, stream_id: i32, cancel: Arc<AtomicBool>) {
        self.streams
            .lock()
            .unwrap()
            .push(ActiveStream { stream_id, cancel });
    }

    fn remove_stream(&self, stream_id: i32) {
        self.streams
            .lock()
            .unwrap()
            .retain(|s| s.stream_id != stream_id);
    }

    fn cancel_stream(&self, stream_id: i32) -> bool {
        let streams = self.streams.lock().unwrap();
        match streams.iter().find(|s| s.stream_id == stream_id) {
            Some(stream) => {
                stream.cancel.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn cancel_all_streams(&self) {
        for stream in self.streams.lock().unwrap().iter() {
            stream.cancel.store(true, Ordering::Release);
        }
    }
}

impl ClientHooks for Gateway {
    fn register(&mut self, stream: UnixStream) -> Option<u32> {
        let idx = self
            .clients
            .iter()
            .position(|slot| slot.read.is_none() && slot.conn.is_none())?;

        let write = stream.try_clone().ok()?;
        self.clients[idx].conn = Some(Arc::new(IpcConn {
            write: Mutex::new(write),
            component: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
        }));
        self.clients[idx].read = Some(stream);
        Some(idx as u32)
    }

    fn release(&mut self, token: u32) -> Option<UnixStream> {
        let slot = self.clients.get_mut(token as usize)?;
        if let Some(conn) = slot.conn.take() {
            conn.cancel_all_streams();
        }
        slot.read.take()
    }

    fn data_ready(&mut self, token: u32) -> Result<(), GgError> {
        let idx = token as usize;
        if idx >= IPC_MAX_CLIENTS {
            return Err(GgError::Invalid);
        }
        self.handle_message(idx)
    }
}

impl Gateway {
    fn handle_message(&mut self, idx: usize) -> Result<(), GgError> {
        let Some(conn) = self.clients[idx].conn.clone() else {
            return Err(GgError::Invalid);
        };

        let mut buf = Vec::new();
        let msg = {
            let Some(stream) = self.clients[idx].read.as_mut() else {
                return Err(GgError::Invalid);
            };
            eventstream::read_message(stream, &mut buf)?
        };
        let common = msg.common_headers()?;

        if conn.component().is_none() {
            return self.handle_connect(idx, &conn, &msg, common);
        }

        if common.message_type != APPLICATION_MESSAGE {
            warn!(
                "unexpected message type {} on an open connection",
                common.message_type
            );
            return Err(GgError::Invalid);
        }

        if common.stream_id <= 0 {
            warn!("application message on reserved stream id {}", common.stream_id);
            return Err(GgError::Invalid);
        }

        let operation = msg.string_header(b"operation");

        if common.message_flags & FLAG_TERMINATE_STREAM != 0 && operation.is_none() {
            // The component is closing one of its streams.
            if !conn.cancel_stream(common.stream_id) {
                debug!("terminate for unknown stream {}", common.stream_id);
            }
            return Ok(());
        }

        let Some(operation) = operation else {
            send_error(
                &conn,
                common.stream_id,
                IpcErrorCode::InvalidArgumentsError,
                "missing operation header",
            );
            return Ok(());
        };

        let Some(op) = operations::find(operation) else {
            warn!(
                "request for unknown operation {}",
                String::from_utf8_lossy(operation)
            );
            send_error(
                &conn,
                common.stream_id,
                IpcErrorCode::ResourceNotFoundError,
                "unknown operation",
            );
            return Ok(());
        };

        if conn.stream_active(common.stream_id) {
            send_error(
                &conn,
                common.stream_id,
                IpcErrorCode::InvalidArgumentsError,
                "stream id already in use",
            );
            return Ok(());
        }

        let payload: Value = if msg.payload.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_slice(msg.payload) {
                Ok(value) => value,
                Err(e) => {
                    warn!("request payload is not valid JSON: {e}");
                    send_error(
                        &conn,
                        common.stream_id,
                        IpcErrorCode::InvalidArgumentsError,
                        "payload is not valid JSON",
                    );
                    return Ok(());
                }
            }
        };

        let params = match (op.build_params)(&payload) {
            Ok(params) => params,
            Err(code) => {
                send_error(&conn, common.stream_id, code, "invalid request payload");
                return Ok(());
            }
        };

        if op.streaming {
            self.start_stream(&conn, op, common.stream_id, &params);
        } else {
            self.unary_call(&conn, op, common.stream_id, &params);
        }
        Ok(())
    }

    fn handle_connect(
        &mut self,
        idx: usize,
        conn: &Arc<IpcConn>,
        msg: &Message<'_>,
        common: CommonHeaders,
    ) -> Result<(), GgError> {
        if common.message_type != CONNECT || common.stream_id != 0 {
            warn!("first message was not a connect on stream 0");
            return Err(GgError::Invalid);
        }

        if msg.int32_header(b"authenticate") != Some(1) {
            warn!("connect did not request authentication");
            send_connect_nack(conn);
            return Err(GgError::Failure);
        }

        let pid = {
            let Some(stream) = self.clients[idx].read.as_ref() else {
                return Err(GgError::Invalid);
            };
            match getsockopt(stream, PeerCredentials) {
                Ok(cred) => cred.pid(),
                Err(e) => {
                    error!("failed to get peer credentials: {e}");
                    send_connect_nack(conn);
                    return Err(GgError::Failure);
                }
            }
        };

        let name_hint = msg.string_header(b"component-name");

        match auth::register_client(pid, name_hint) {
            Ok((handle, svcuid)) => {
                *conn.component.lock().unwrap() = Some(handle);
                conn.send_message(
                    &[
                        Header::int32(b":message-type", CONNECT_ACK),
                        Header::int32(b":message-flags", FLAG_CONNECTION_ACCEPTED),
                        Header::int32(b":stream-id", 0),
                        Header::string(b"svcuid", svcuid.as_bytes()),
                    ],
                    b"",
                );
                debug!("authenticated process {pid}");
                Ok(())
            }
            Err(e) => {
                error!("failed to authenticate process {pid}: {e}");
                send_connect_nack(conn);
                Err(GgError::Failure)
            }
        }
    }

    fn unary_call(&self, conn: &Arc<IpcConn>, op: &OpDesc, stream_id: i32, params: &Value) {
        let mut params_mem = vec![0u8; COREBUS_MAX_MSG_LEN];
        let mut params_arena = Arena::new(&mut params_mem);
        let params = match json_to_obj(params, &mut params_arena) {
            Ok(Object::Map(map)) => map,
            _ => {
                send_error(
                    conn,
                    stream_id,
                    IpcErrorCode::ServiceError,
                    "internal service error",
                );
                return;
            }
        };

        let mut result_mem = vec![0u8; COREBUS_MAX_MSG_LEN];
        let mut result_arena = Arena::new(&mut result_mem);
        match bus_client::call(
            &self.socket_dir,
            op.interface,
            op.method,
            params,
            &mut result_arena,
        ) {
            Ok(result) => {
                let payload = obj_to_json(result)
                    .ok()
                    .and_then(|v| serde_json::to_vec(&v).ok())
                    .unwrap_or_else(|| b"{}".to_vec());
                conn.send_message(
                    &[
                        Header::int32(b":message-type", APPLICATION_MESSAGE),
                        Header::int32(b":message-flags", FLAG_TERMINATE_STREAM),
                        Header::int32(b":stream-id", stream_id),
                    ],
                    &payload,
                );
            }
            Err(BusError::Remote(code)) => {
                send_error(conn, stream_id, IpcErrorCode::from_gg(code), "request failed");
            }
            Err(e) => {
                warn!("bus call for {} failed: {e}", op.operation);
                send_error(
                    conn,
                    stream_id,
                    IpcErrorCode::ServiceError,
                    "internal service error",
                );
            }
        }
    }

    fn start_stream(&self, conn: &Arc<IpcConn>, op: &OpDesc, stream_id: i32, params: &Value) {
        let mut params_mem = vec![0u8; COREBUS_MAX_MSG_LEN];
        let mut params_arena = Arena::new(&mut params_mem);
        let params = match json_to_obj(params, &mut params_arena) {
            Ok(Object::Map(map)) => map,
            _ => {
                send_error(
                    conn,
                    stream_id,
                    IpcErrorCode::ServiceError,
                    "internal service error",
                );
                return;
            }
        };

        match bus_client::subscribe(&self.socket_dir, op.interface, op.method, params) {
            Ok(sub) => {
                // Ack the stream before any events flow on it.
                conn.send_message(
                    &[
                        Header::int32(b":message-type", APPLICATION_MESSAGE),
                        Header::int32(b":message-flags", 0),
                        Header::int32(b":stream-id", stream_id),
                    ],
                    b"",
                );

                let cancel = Arc::new(AtomicBool::new(false));
                conn.add_stream(stream_id, cancel.clone());
                let conn = conn.clone();
                thread::spawn(move || forward_stream(conn, stream_id, sub, cancel));
            }
            Err(BusError::Remote(code)) => {
                send_error(
                    conn,
                    stream_id,
                    IpcErrorCode::from_gg(code),
                    "subscription refused",
                );
            }
            Err(e) => {
                warn!("bus subscribe for {} failed: {e}", op.operation);
                send_error(
                    conn,
                    stream_id,
                    IpcErrorCode::ServiceError,
                    "internal service error",
                );
            }
        }
    }
}

fn forward_stream(
    conn: Arc<IpcConn>,
    stream_id: i32,
    mut sub: bus_client::Subscription,
    cancel: Arc<AtomicBool>,
) {
    loop {
        if cancel.load(Ordering::Acquire) {
            // Component closed the stream; dropping the subscription sends
            // the bus close frame.
            conn.remove_stream(stream_id);
            return;
        }

        let mut mem = vec![0u8; COREBUS_MAX_MSG_LEN];
        let mut arena = Arena::new(&mut mem);
        match sub.next_timeout(Duration::from_millis(250), &mut arena) {
            Ok(Some(obj)) => {
                let payload = obj_to_json(obj)
                    .ok()
                    .and_then(|v| serde_json::to_vec(&v).ok())
                    .unwrap_or_else(|| b"{}".to_vec());
                conn.send_message(
                    &[
                        Header::int32(b":message-type", APPLICATION_MESSAGE),
                        Header::int32(b":message-flags", 0),
                        Header::int32(b":stream-id", stream_id),
                    ],
                    &payload,
                );
            }
            Ok(None) => {
                // Upstream subscription ended; terminate toward the
                // component.
                conn.send_message(
                    &[
                        Header::int32(b":message-type", APPLICATION_MESSAGE),
                        Header::int32(b":message-flags", FLAG_TERMINATE_STREAM),
                        Header::int32(b":stream-id", stream_id),
                    ],
                    b"",
                );
                conn.remove_stream(stream_id);
                return;
            }
            Err(BusError::Protocol(GgError::NoData)) => continue,
            Err(e) => {
                warn!("subscription stream failed: {e}");
                conn.send_message(
                    &[
                        Header::int32(b":message-type", APPLICATION_MESSAGE),
                        Header::int32(b":message-flags", FLAG_TERMINATE_STREAM),
                        Header::int32(b":stream-id", stream_id),
                    ],
                    b"",
                );
                conn.remove_stream(stream_id);
                return;
            }
        }
    }
}

fn send_connect_nack(conn: &IpcConn) {
    conn.send_message(
        &[
            Header::int32(b":message-type", CONNECT_ACK),
            Header::int32(b":message-flags", 0),
            Header::int32(b":stream-id", 0),
        ],
        b"",
    );
}

fn send_error(conn: &IpcConn, stream_id: i32, code: IpcErrorCode, message: &str) {
    let payload = serde_json::json!({
        "_message": message,
        "_service": code.err_str(),
    });
    let payload = serde_json::to_vec(&payload).unwrap_or_default();
    conn.send_message(
        &[
            Header::int32(b":message-type", APPLICATION_ERROR),
            Header::int32(b":message-flags", FLAG_TERMINATE_STREAM),
            Header::int32(b":stream-id", stream_id),
            Header::string(b"service-model-type", code.service_model_type().as_bytes()),
        ],
        &payload,
    );
}
