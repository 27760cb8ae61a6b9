// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Subscribe, wait for one matching event, then close.
//!
//! Some interfaces deliver a call's real result over a subscription (e.g.
//! request/response bridged over a broker). This helper opens the
//! subscription, gives each incoming event to `accept`, and returns once an
//! event is accepted. Returning `false` from `accept` skips that event.

use std::path::Path;
use std::time::{Duration, Instant};

use log::*;

use gg_lib::{Arena, GgError, Map, Object};

use crate::{client, Error, COREBUS_MAX_MSG_LEN};

pub fn sub_response(
    socket_dir: &Path,
    interface: &str,
    method: &str,
    params: Map<'_>,
    timeout: Duration,
    mut accept: impl FnMut(Object<'_>) -> bool,
) -> Result<(), Error> {
    let mut sub = client::subscribe(socket_dir, interface, method, params)?;
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("timed out waiting for a response");
            return Err(Error::Protocol(GgError::Failure));
        }

        let mut mem = vec![0u8; COREBUS_MAX_MSG_LEN];
        let mut arena = Arena::new(&mut mem);

        match sub.next_timeout(remaining, &mut arena) {
            Ok(Some(obj)) => {
                if accept(obj) {
                    return Ok(());
                }
                // Not the event we are waiting for; keep listening.
            }
            Ok(None) => {
                debug!("subscription closed before a response arrived");
                return Err(Error::Protocol(GgError::NoConn));
            }
            Err(Error::Protocol(GgError::NoData)) => {
                warn!("timed out waiting for a response");
                return Err(Error::Protocol(GgError::Failure));
            }
            Err(e) => return Err(e),
        }
    }
}
