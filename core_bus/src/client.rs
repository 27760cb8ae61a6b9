// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Bus client: blocking calls, notifications, and subscriptions.
//!
//! A subscription is a channel of response frames fed by a private receiver
//! thread. `next` blocks for the next object and returns `None` once the
//! stream has closed; dropping the subscription closes it from this side.

use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::*;

use gg_lib::{Arena, GgError, Map, Object};

use crate::{
    encode_request, gg_to_error, interface_socket_path, read_response, tlv, Error, FrameKind,
    ResponseFrame, COREBUS_CLIENT_MAX_SUBSCRIPTIONS, DEFAULT_TIMEOUT,
};

/// Open subscriptions across the process, bounded by
/// [`COREBUS_CLIENT_MAX_SUBSCRIPTIONS`].
static ACTIVE_SUBSCRIPTIONS: Mutex<usize> = Mutex::new(0);

fn connect(
    socket_dir: &Path,
    interface: &str,
    read_timeout: Option<Duration>,
) -> Result<UnixStream, Error> {
    let path = interface_socket_path(socket_dir, interface);
    let stream = UnixStream::connect(&path)?;
    stream.set_read_timeout(read_timeout)?;
    stream.set_write_timeout(Some(DEFAULT_TIMEOUT))?;
    Ok(stream)
}

/// Make a bus call and decode the result into `arena`.
pub fn call<'m>(
    socket_dir: &Path,
    interface: &str,
    method: &str,
    params: Map<'_>,
    arena: &mut Arena<'m>,
) -> Result<Object<'m>, Error> {
    call_timeout(socket_dir, interface, method, params, DEFAULT_TIMEOUT, arena)
}

/// [`call`] with an explicit response timeout.
pub fn call_timeout<'m>(
    socket_dir: &Path,
    interface: &str,
    method: &str,
    params: Map<'_>,
    timeout: Duration,
    arena: &mut Arena<'m>,
) -> Result<Object<'m>, Error> {
    let mut stream = connect(socket_dir, interface, Some(timeout))?;

    let frame = encode_request(FrameKind::Call, method.as_bytes(), params)
        .map_err(Error::Protocol)?;
    stream.write_all(&frame)?;

    match read_response(&mut stream).map_err(gg_to_error)? {
        ResponseFrame::Ok(body) => {
            let mut encoded = body.as_slice();
            tlv::decode_obj(&mut encoded, arena).map_err(Error::Protocol)
        }
        ResponseFrame::Err(code) => Err(Error::Remote(code)),
        ResponseFrame::Accept | ResponseFrame::Close => Err(Error::Protocol(GgError::Invalid)),
    }
}

/// Send a notification. Fire-and-forget: no response, no error path beyond
/// the local write.
pub fn notify(
    socket_dir: &Path,
    interface: &str,
    method: &str,
    params: Map<'_>,
) -> Result<(), Error> {
    let mut stream = connect(socket_dir, interface, Some(DEFAULT_TIMEOUT))?;

    let frame = encode_request(FrameKind::Notify, method.as_bytes(), params)
        .map_err(Error::Protocol)?;
    stream.write_all(&frame)?;
    Ok(())
}

/// Open a subscription. Blocks until the server accepts or rejects it.
pub fn subscribe(
    socket_dir: &Path,
    interface: &str,
    method: &str,
    params: Map<'_>,
) -> Result<Subscription, Error> {
    {
        let mut count = ACTIVE_SUBSCRIPTIONS.lock().unwrap();
        if *count >= COREBUS_CLIENT_MAX_SUBSCRIPTIONS {
            warn!("maximum client subscriptions exceeded");
            return Err(Error::Protocol(GgError::Nomem));
        }
        *count += 1;
    }

    match subscribe_inner(socket_dir, interface, method, params) {
        Ok(sub) => Ok(sub),
        Err(e) => {
            *ACTIVE_SUBSCRIPTIONS.lock().unwrap() -= 1;
            Err(e)
        }
    }
}

fn subscribe_inner(
    socket_dir: &Path,
    interface: &str,
    method: &str,
    params: Map<'_>,
) -> Result<Subscription, Error> {
    let mut stream = connect(socket_dir, interface, Some(DEFAULT_TIMEOUT))?;

    let frame = encode_request(FrameKind::Subscribe, method.as_bytes(), params)
        .map_err(Error::Protocol)?;
    stream.write_all(&frame)?;

    match read_response(&mut stream).map_err(gg_to_error)? {
        ResponseFrame::Accept => {}
        ResponseFrame::Err(code) => return Err(Error::Remote(code)),
        ResponseFrame::Ok(_) | ResponseFrame::Close => {
            return Err(Error::Protocol(GgError::Invalid))
        }
    }

    // The stream is long-lived; the receiver thread blocks on it.
    stream.set_read_timeout(None)?;
    let reader = stream.try_clone()?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || receiver_loop(reader, tx));

    Ok(Subscription {
        stream,
        rx,
        closed: false,
    })
}

fn receiver_loop(mut stream: UnixStream, tx: Sender<Vec<u8>>) {
    loop {
        match read_response(&mut stream) {
            Ok(ResponseFrame::Ok(body)) => {
                if tx.send(body).is_err() {
                    // Subscription was dropped locally.
                    return;
                }
            }
            Ok(ResponseFrame::Close) => {
                debug!("subscription closed by server");
                return;
            }
            Ok(ResponseFrame::Err(e)) => {
                debug!("subscription closed with remote error: {e}");
                return;
            }
            Ok(ResponseFrame::Accept) => {
                warn!("unexpected accept frame on an open subscription");
                return;
            }
            Err(e) => {
                if e != GgError::NoConn {
                    debug!("subscription stream error: {e}");
                }
                return;
            }
        }
    }
}

/// An open subscription: a stream of objects ending in close.
pub struct Subscription {
    stream: UnixStream,
    rx: Receiver<Vec<u8>>,
    closed: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closed)
            .finish()
    }
}

impl Subscription {
    /// Wait for the next response, decoded into `arena`. Returns `None`
    /// once the subscription has closed (from either side).
    pub fn next<'m>(&mut self, arena: &mut Arena<'m>) -> Result<Option<Object<'m>>, Error> {
        match self.rx.recv() {
            Ok(body) => {
                let mut encoded = body.as_slice();
                tlv::decode_obj(&mut encoded, arena)
                    .map(Some)
                    .map_err(Error::Protocol)
            }
            Err(_) => Ok(None),
        }
    }

    /// [`Subscription::next`] with a timeout; expiry is `NoData`.
    pub fn next_timeout<'m>(
        &mut self,
        timeout: Duration,
        arena: &mut Arena<'m>,
    ) -> Result<Option<Object<'m>>, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(body) => {
                let mut encoded = body.as_slice();
                tlv::decode_obj(&mut encoded, arena)
                    .map(Some)
                    .map_err(Error::Protocol)
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::Protocol(GgError::NoData)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    /// Close the subscription, sending the close frame to the server.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Ok(frame) = encode_request(FrameKind::SubClose, b"", Map::new(&[])) {
            let _ = (&self.stream).write_all(&frame);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close_inner();
        *ACTIVE_SUBSCRIPTIONS.lock().unwrap() -= 1;
    }
}
