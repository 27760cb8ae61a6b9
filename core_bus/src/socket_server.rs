// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Shared unix-socket listener used by the bus server and the IPC gateway.
//!
//! Runs a single-threaded epoll loop. The listening socket is registered
//! with a sentinel of `u64::MAX`, distinguishable from any client token
//! (tokens fit in a u32). Client bookkeeping lives in the caller's hooks;
//! this module owns only accept, epoll registration, and teardown.

use std::convert::Infallible;
use std::fs;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;

use log::*;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::socket::{
    accept, bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr,
};

use gg_lib::GgError;

use crate::DEFAULT_TIMEOUT;

const LISTENER_TOKEN: u64 = u64::MAX;
const MAX_SOCKET_BACKLOG: i32 = 20;

/// Client registry maintained by the caller of [`socket_server_listen`].
pub trait ClientHooks {
    /// Store an accepted client, returning its token. `None` refuses the
    /// client; the stream is dropped (closing the fd).
    fn register(&mut self, stream: UnixStream) -> Option<u32>;

    /// Remove a client, returning its stream so the listener can deregister
    /// it from epoll before it is closed.
    fn release(&mut self, token: u32) -> Option<UnixStream>;

    /// Data is readable on a registered client. A non-OK return releases
    /// and closes that client.
    fn data_ready(&mut self, token: u32) -> Result<(), GgError>;
}

/// Bind `path` and serve clients forever. Only returns on setup failure or
/// a broken event loop.
pub fn socket_server_listen<H: ClientHooks>(
    path: &Path,
    hooks: &mut H,
) -> Result<Infallible, GgError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                error!("failed to create socket parent dirs {}: {e}", parent.display());
                GgError::Failure
            })?;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o755));
        }
    }

    // ENOENT is expected; a real failure to remove an existing file will
    // show up as an error in bind().
    let _ = fs::remove_file(path);

    let server_fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| {
        error!("failed to create socket: {e}");
        GgError::Failure
    })?;

    let addr = UnixAddr::new(path).map_err(|e| {
        error!("socket path {} invalid: {e}", path.display());
        GgError::Failure
    })?;

    bind(server_fd.as_raw_fd(), &addr).map_err(|e| {
        error!("failed to bind {}: {e}", path.display());
        GgError::Failure
    })?;

    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o660));

    let backlog = Backlog::new(MAX_SOCKET_BACKLOG).map_err(|_| GgError::Failure)?;
    listen(&server_fd, backlog).map_err(|e| {
        error!("failed to listen on {}: {e}", path.display());
        GgError::Failure
    })?;

    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(|e| {
        error!("failed to create epoll fd: {e}");
        GgError::Failure
    })?;

    epoll
        .add(&server_fd, EpollEvent::new(EpollFlags::EPOLLIN, LISTENER_TOKEN))
        .map_err(|e| {
            error!("failed to add listener to epoll: {e}");
            GgError::Failure
        })?;

    debug!("listening on {}", path.display());

    let mut events = [EpollEvent::empty(); 10];

    loop {
        let ready = match epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                error!("failed to wait on epoll: {e}");
                return Err(GgError::Failure);
            }
        };

        for event in &events[..ready] {
            let token = event.data();
            if token == LISTENER_TOKEN {
                accept_client(&epoll, server_fd.as_raw_fd(), hooks);
            } else if token <= u64::from(u32::MAX) {
                let token = token as u32;
                if hooks.data_ready(token).is_err() {
                    release_client(&epoll, hooks, token);
                }
            } else {
                error!("invalid data returned from epoll");
                return Err(GgError::Failure);
            }
        }
    }
}

fn accept_client<H: ClientHooks>(epoll: &Epoll, server_fd: i32, hooks: &mut H) {
    let fd = match accept(server_fd) {
        Ok(fd) => fd,
        Err(e) => {
            error!("failed to accept on socket: {e}");
            return;
        }
    };

    // SAFETY: accept returned a fresh fd that nothing else owns.
    let stream = unsafe { UnixStream::from_raw_fd(fd) };

    // To prevent deadlocking on a hanged client, add a timeout.
    let _ = stream.set_read_timeout(Some(DEFAULT_TIMEOUT));
    let _ = stream.set_write_timeout(Some(DEFAULT_TIMEOUT));

    let raw = stream.as_raw_fd();
    let Some(token) = hooks.register(stream) else {
        debug!("closed new client due to max clients reached");
        return;
    };

    // SAFETY: the fd is held open by the hooks' table until release().
    let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
    if let Err(e) = epoll.add(borrowed, EpollEvent::new(EpollFlags::EPOLLIN, u64::from(token))) {
        error!("failed to register client fd with epoll: {e}");
        release_client(epoll, hooks, token);
        return;
    }

    debug!("accepted client connection");
}

fn release_client<H: ClientHooks>(epoll: &Epoll, hooks: &mut H, token: u32) {
    if let Some(stream) = hooks.release(token) {
        let _ = epoll.delete(&stream);
        // Dropping the stream closes the fd.
    }
}
