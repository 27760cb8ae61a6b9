// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Bus server: method dispatch, connection handles, and subscriptions.
//!
//! One listener thread drives all connections through the socket-server
//! epoll loop. Handlers run inline on that thread and receive the decoded
//! parameter map plus a handle; they must respond, return an error, or (for
//! subscription methods) accept the subscription. A handle may be kept to
//! respond later; [`BusCtl`] is the cloneable, thread-safe way to do so.

use std::convert::Infallible;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::*;

use gg_lib::{Arena, GgError, Map, Object};

use crate::socket_server::{socket_server_listen, ClientHooks};
use crate::{
    interface_socket_path, read_request, tlv, Error, FrameKind, Handle, COREBUS_MAX_CLIENTS,
    COREBUS_MAX_MSG_LEN,
};

/// Receives client invocations of one method. The handle must be used to
/// respond or return an error; it may be saved to respond later.
/// Subscriptions must be accepted before responding on them.
pub type BusHandlerFn<T> = fn(&mut T, &mut Conns<T>, Map<'_>, Handle);

/// Runs when a subscription closes, on the listener thread.
pub type SubCloseFn<T> = fn(&mut T, Handle);

/// Method table entry for a bus interface.
pub struct MethodDesc<T> {
    pub name: &'static str,
    pub is_subscription: bool,
    pub handler: BusHandlerFn<T>,
}

enum SlotState {
    Free,
    /// Connected; `kind` is set once the first frame arrives, and `inflight`
    /// while a call awaits its response.
    Open {
        kind: Option<FrameKind>,
        inflight: bool,
    },
    Subscribed,
    /// Response sent or error returned; awaiting teardown by the listener.
    Closing {
        was_subscribed: bool,
    },
}

struct SlotMeta {
    generation: u16,
    state: SlotState,
    conn: Option<Arc<SendConn>>,
}

impl Default for SlotMeta {
    fn default() -> Self {
        SlotMeta {
            generation: 0,
            state: SlotState::Free,
            conn: None,
        }
    }
}

/// The write half of a connection. All sends serialize on the mutex so
/// `respond` is safe from any thread.
struct SendConn {
    write: Mutex<UnixStream>,
}

impl SendConn {
    fn send(&self, frame: &[u8]) {
        let mut stream = self.write.lock().unwrap();
        if let Err(e) = stream.write_all(frame) {
            // Peer is gone or its buffer stayed full past the timeout; the
            // message is dropped.
            warn!("dropping response frame: {e}");
        }
    }

    fn shutdown(&self) {
        let stream = self.write.lock().unwrap();
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn set_read_timeout_off(&self) {
        let stream = self.write.lock().unwrap();
        let _ = stream.set_read_timeout(None);
    }
}

struct Shared {
    slots: Mutex<Vec<SlotMeta>>,
}

impl Shared {
    /// Resolve a handle to its slot index, checking the generation.
    fn resolve(slots: &[SlotMeta], handle: Handle) -> Option<usize> {
        let (idx, generation) = handle.unpack(COREBUS_MAX_CLIENTS)?;
        let meta = slots.get(idx)?;
        if meta.generation != generation || matches!(meta.state, SlotState::Free) {
            return None;
        }
        Some(idx)
    }

    fn respond(&self, handle: Handle, obj: Object<'_>) {
        let frame = match crate::encode_response_obj(obj) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode response: {e}");
                self.return_err(handle, e);
                return;
            }
        };

        enum Case {
            Stream,
            FinishCall,
            FinishNotify,
            Invalid(&'static str),
        }

        let mut slots = self.slots.lock().unwrap();
        let Some(idx) = Self::resolve(&slots, handle) else {
            warn!("respond on an invalid handle");
            return;
        };

        let case = match slots[idx].state {
            SlotState::Subscribed => Case::Stream,
            SlotState::Open {
                kind: Some(FrameKind::Call),
                ..
            } => Case::FinishCall,
            SlotState::Open {
                kind: Some(FrameKind::Notify),
                ..
            } => Case::FinishNotify,
            SlotState::Open { .. } => Case::Invalid("respond on a subscription before accept"),
            _ => Case::Invalid("respond on a connection in an invalid state"),
        };

        match case {
            Case::Stream => {
                let conn = slots[idx].conn.clone();
                drop(slots);
                if let Some(conn) = conn {
                    conn.send(&frame);
                }
            }
            Case::FinishCall => {
                let conn = slots[idx].conn.clone();
                slots[idx].state = SlotState::Closing {
                    was_subscribed: false,
                };
                drop(slots);
                if let Some(conn) = conn {
                    conn.send(&frame);
                    conn.shutdown();
                }
            }
            Case::FinishNotify => {
                // Notifications have no response path; just finish.
                let conn = slots[idx].conn.clone();
                slots[idx].state = SlotState::Closing {
                    was_subscribed: false,
                };
                drop(slots);
                if let Some(conn) = conn {
                    conn.shutdown();
                }
            }
            Case::Invalid(msg) => warn!("{msg}"),
        }
    }

    fn return_err(&self, handle: Handle, err: GgError) {
        let frame = crate::encode_response_err(err);

        let mut slots = self.slots.lock().unwrap();
        let Some(idx) = Self::resolve(&slots, handle) else {
            warn!("return_err on an invalid handle");
            return;
        };

        let was_subscribed = match slots[idx].state {
            SlotState::Subscribed => true,
            SlotState::Open { .. } => false,
            _ => {
                warn!("return_err on a connection in an invalid state");
                return;
            }
        };

        let conn = slots[idx].conn.clone();
        slots[idx].state = SlotState::Closing { was_subscribed };
        drop(slots);

        if let Some(conn) = conn {
            conn.send(&frame);
            conn.shutdown();
        }
    }

    fn server_sub_close(&self, handle: Handle) {
        let frame = crate::encode_response_close();

        let mut slots = self.slots.lock().unwrap();
        let Some(idx) = Self::resolve(&slots, handle) else {
            warn!("server_sub_close on an invalid handle");
            return;
        };

        if !matches!(slots[idx].state, SlotState::Subscribed) {
            warn!("server_sub_close on a handle that is not subscribed");
            return;
        }

        let conn = slots[idx].conn.clone();
        slots[idx].state = SlotState::Closing {
            was_subscribed: true,
        };
        drop(slots);

        if let Some(conn) = conn {
            conn.send(&frame);
            conn.shutdown();
        }
    }
}

/// Cloneable, `Send + Sync` surface for responding outside the listener
/// thread (deferred call responses, subscription streaming from workers).
#[derive(Clone)]
pub struct BusCtl {
    shared: Arc<Shared>,
}

impl BusCtl {
    /// Send a response. Closes call connections; streams one frame on
    /// subscribed handles.
    pub fn respond(&self, handle: Handle, obj: Object<'_>) {
        self.shared.respond(handle, obj);
    }

    /// Respond with an error and close the connection.
    pub fn return_err(&self, handle: Handle, err: GgError) {
        self.shared.return_err(handle, err);
    }

    /// Close a subscribed handle, sending the final close frame.
    pub fn server_sub_close(&self, handle: Handle) {
        self.shared.server_sub_close(handle);
    }
}

/// Connection table passed to handlers on the listener thread.
pub struct Conns<T> {
    shared: Arc<Shared>,
    reads: Vec<Option<UnixStream>>,
    on_close: Vec<Option<SubCloseFn<T>>>,
}

impl<T> Conns<T> {
    /// Send a response. Closes call connections; streams one frame on
    /// subscribed handles.
    pub fn respond(&self, handle: Handle, obj: Object<'_>) {
        self.shared.respond(handle, obj);
    }

    /// Respond with an error and close the connection.
    pub fn return_err(&self, handle: Handle, err: GgError) {
        self.shared.return_err(handle, err);
    }

    /// Accept a subscription. Must be called before responding on it. The
    /// close callback runs when the peer disconnects, the stream is closed
    /// by either side, or an error is returned on the handle.
    pub fn sub_accept(&mut self, handle: Handle, on_close: Option<SubCloseFn<T>>) {
        let frame = crate::encode_response_accept();

        let mut slots = self.shared.slots.lock().unwrap();
        let Some(idx) = Shared::resolve(&slots, handle) else {
            warn!("sub_accept on an invalid handle");
            return;
        };

        if !matches!(
            slots[idx].state,
            SlotState::Open {
                kind: Some(FrameKind::Subscribe),
                ..
            }
        ) {
            warn!("sub_accept on a handle that is not a pending subscription");
            return;
        }

        slots[idx].state = SlotState::Subscribed;
        let conn = slots[idx].conn.clone();
        drop(slots);

        if let Some(conn) = conn {
            // The stream is long-lived; only writes keep a timeout.
            conn.set_read_timeout_off();
            conn.send(&frame);
        }
        self.on_close[idx] = Some(on_close.unwrap_or(noop_close));
    }

    /// Close a subscribed handle, sending the final close frame.
    pub fn server_sub_close(&self, handle: Handle) {
        self.shared.server_sub_close(handle);
    }

    /// A handle to this server usable from other threads.
    pub fn ctl(&self) -> BusCtl {
        BusCtl {
            shared: self.shared.clone(),
        }
    }
}

fn noop_close<T>(_state: &mut T, _handle: Handle) {}

struct Dispatcher<'h, T> {
    handlers: &'h [MethodDesc<T>],
    state: T,
    conns: Conns<T>,
}

impl<T> Dispatcher<'_, T> {
    fn handle_frame(&mut self, idx: usize) -> Result<(), GgError> {
        let (generation, subscribed, inflight) = {
            let slots = self.conns.shared.slots.lock().unwrap();
            match slots[idx].state {
                SlotState::Open { inflight, .. } => (slots[idx].generation, false, inflight),
                SlotState::Subscribed => (slots[idx].generation, true, false),
                // Already being torn down; any traffic just finishes it.
                SlotState::Closing { .. } | SlotState::Free => return Err(GgError::NoConn),
            }
        };

        let request = {
            let Some(stream) = self.conns.reads[idx].as_mut() else {
                return Err(GgError::Invalid);
            };
            match read_request(stream) {
                Ok(request) => request,
                Err(e) => {
                    if e != GgError::NoConn {
                        debug!("failed to read request: {e}");
                    }
                    return Err(e);
                }
            }
        };

        let handle = Handle::pack(idx, generation);

        if subscribed {
            return match request.kind {
                FrameKind::SubClose => {
                    debug!("client closed subscription on slot {idx}");
                    Err(GgError::NoConn)
                }
                _ => {
                    warn!("unexpected frame on a subscribed connection");
                    Err(GgError::Invalid)
                }
            };
        }

        if inflight {
            warn!("client sent a second request before its response");
            return Err(GgError::Invalid);
        }

        if request.kind == FrameKind::SubClose {
            warn!("subscription close on a connection with no subscription");
            return Err(GgError::Invalid);
        }

        let mut params_mem = vec![0u8; COREBUS_MAX_MSG_LEN];
        let mut arena = Arena::new(&mut params_mem);
        let mut encoded = request.params.as_slice();
        let params = match tlv::decode_map(&mut encoded, &mut arena) {
            Ok(map) => map,
            Err(e) => {
                warn!("failed to parse request params: {e}");
                self.conns.shared.return_err(handle, GgError::Parse);
                return Err(GgError::Parse);
            }
        };

        let method = request.method.as_slice();
        let Some(desc) = self
            .handlers
            .iter()
            .find(|desc| desc.name.as_bytes() == method)
        else {
            debug!(
                "request for unknown method {}",
                String::from_utf8_lossy(method)
            );
            self.conns.shared.return_err(handle, GgError::NoEntry);
            return Err(GgError::NoEntry);
        };

        let kind_valid = if desc.is_subscription {
            request.kind == FrameKind::Subscribe
        } else {
            matches!(request.kind, FrameKind::Call | FrameKind::Notify)
        };
        if !kind_valid {
            warn!(
                "frame kind {:?} does not match method {}",
                request.kind, desc.name
            );
            self.conns.shared.return_err(handle, GgError::Invalid);
            return Err(GgError::Invalid);
        }

        {
            let mut slots = self.conns.shared.slots.lock().unwrap();
            slots[idx].state = SlotState::Open {
                kind: Some(request.kind),
                inflight: true,
            };
        }

        (desc.handler)(&mut self.state, &mut self.conns, params, handle);

        let slots = self.conns.shared.slots.lock().unwrap();
        match slots[idx].state {
            // Handler responded or errored; tear the connection down now so
            // the handle is released within this event-loop iteration.
            SlotState::Closing { .. } => Err(GgError::Expected),
            SlotState::Subscribed => Ok(()),
            // Notifications are done once the handler returns.
            SlotState::Open { .. } if request.kind == FrameKind::Notify => {
                Err(GgError::Expected)
            }
            // Response deferred; the connection stays open.
            _ => Ok(()),
        }
    }
}

impl<T> ClientHooks for Dispatcher<'_, T> {
    fn register(&mut self, stream: UnixStream) -> Option<u32> {
        let mut slots = self.conns.shared.slots.lock().unwrap();
        let idx = slots
            .iter()
            .position(|meta| matches!(meta.state, SlotState::Free))?;

        let write = stream.try_clone().ok()?;
        slots[idx].state = SlotState::Open {
            kind: None,
            inflight: false,
        };
        slots[idx].conn = Some(Arc::new(SendConn {
            write: Mutex::new(write),
        }));
        drop(slots);

        self.conns.reads[idx] = Some(stream);
        self.conns.on_close[idx] = None;
        Some(idx as u32)
    }

    fn release(&mut self, token: u32) -> Option<UnixStream> {
        let idx = token as usize;

        let mut slots = self.conns.shared.slots.lock().unwrap();
        let meta = slots.get_mut(idx)?;
        let was_subscribed = matches!(
            meta.state,
            SlotState::Subscribed
                | SlotState::Closing {
                    was_subscribed: true
                }
        );
        let generation = meta.generation;
        meta.state = SlotState::Free;
        meta.conn = None;
        meta.generation = meta.generation.wrapping_add(1);
        drop(slots);

        let stream = self.conns.reads[idx].take();
        if was_subscribed {
            if let Some(on_close) = self.conns.on_close[idx].take() {
                on_close(&mut self.state, Handle::pack(idx, generation));
            }
        }
        self.conns.on_close[idx] = None;
        stream
    }

    fn data_ready(&mut self, token: u32) -> Result<(), GgError> {
        let idx = token as usize;
        if idx >= COREBUS_MAX_CLIENTS {
            return Err(GgError::Invalid);
        }
        self.handle_frame(idx)
    }
}

/// Listen on `interface` and dispatch incoming method invocations to
/// `handlers` forever. `state` is shared by all handlers of the interface.
pub fn listen<T>(
    socket_dir: &Path,
    interface: &str,
    handlers: &[MethodDesc<T>],
    state: T,
) -> Result<Infallible, Error> {
    let path = interface_socket_path(socket_dir, interface);

    let shared = Arc::new(Shared {
        slots: Mutex::new((0..COREBUS_MAX_CLIENTS).map(|_| SlotMeta::default()).collect()),
    });

    let mut dispatcher = Dispatcher {
        handlers,
        state,
        conns: Conns {
            shared,
            reads: (0..COREBUS_MAX_CLIENTS).map(|_| None).collect(),
            on_close: vec![None; COREBUS_MAX_CLIENTS],
        },
    };

    socket_server_listen(&path, &mut dispatcher).map_err(Error::Protocol)
}
