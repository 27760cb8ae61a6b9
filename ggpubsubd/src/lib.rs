// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Local publish/subscribe daemon.
//!
//! Serves the `pubsub` bus interface: `publish` fans a message out to every
//! subscription whose MQTT-style topic filter matches, and `subscribe` opens
//! a stream of matching messages.

use std::path::Path;

use log::*;

use core_bus::server::{self, Conns, MethodDesc};
use core_bus::{Error, Handle, COREBUS_MAX_CLIENTS};
use gg_lib::{GgError, Map, Object, SchemaEntry, Tag};

/// Matches the AWS IoT topic length limit.
pub const PUBSUB_MAX_TOPIC_LEN: usize = 256;

/// Leaves at least one connection slot free for publishers, so
/// subscriptions cannot block publishes from being handled.
pub const PUBSUB_MAX_SUBSCRIPTIONS: usize = COREBUS_MAX_CLIENTS - 1;

/// The bus interface this daemon serves.
pub const PUBSUB_INTERFACE: &str = "pubsub";

#[derive(Default)]
struct PubSubState {
    subs: Vec<SubEntry>,
}

struct SubEntry {
    handle: Handle,
    filter: Vec<u8>,
}

const HANDLERS: &[MethodDesc<PubSubState>] = &[
    MethodDesc {
        name: "publish",
        is_subscription: false,
        handler: rpc_publish,
    },
    MethodDesc {
        name: "subscribe",
        is_subscription: true,
        handler: rpc_subscribe,
    },
];

/// Run the pubsub daemon. Only returns on a fatal server error.
pub fn run_ggpubsubd(socket_dir: &Path) -> Error {
    match server::listen(socket_dir, PUBSUB_INTERFACE, HANDLERS, PubSubState::default()) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

fn rpc_publish(state: &mut PubSubState, conns: &mut Conns<PubSubState>, params: Map<'_>, handle: Handle) {
    let validated = params.validate([
        SchemaEntry::required(b"topic", Tag::Buf),
        SchemaEntry::optional(b"payload", Tag::Buf),
    ]);
    let topic = match validated {
        Ok([Some(topic), _]) => topic.into_buf(),
        Ok(_) | Err(_) => {
            error!("publish params missing topic buffer");
            conns.return_err(handle, GgError::Invalid);
            return;
        }
    };

    if topic.len() > PUBSUB_MAX_TOPIC_LEN {
        error!("publish topic too large");
        conns.return_err(handle, GgError::Range);
        return;
    }

    for sub in &state.subs {
        if topic_filter_matches(&sub.filter, topic) {
            conns.respond(sub.handle, Object::Map(params));
        }
    }

    conns.respond(handle, Object::Null);
}

fn rpc_subscribe(
    state: &mut PubSubState,
    conns: &mut Conns<PubSubState>,
    params: Map<'_>,
    handle: Handle,
) {
    let validated = params.validate([SchemaEntry::required(b"topic_filter", Tag::Buf)]);
    let filter = match validated {
        Ok([Some(filter)]) => filter.into_buf(),
        Ok(_) | Err(_) => {
            error!("subscribe received invalid arguments");
            conns.return_err(handle, GgError::Invalid);
            return;
        }
    };

    if filter.is_empty() || filter.len() > PUBSUB_MAX_TOPIC_LEN {
        error!("subscribe topic filter length invalid");
        conns.return_err(handle, GgError::Range);
        return;
    }

    if !topic_filter_is_valid(filter) {
        error!(
            "subscribe topic filter {} malformed",
            String::from_utf8_lossy(filter)
        );
        conns.return_err(handle, GgError::Invalid);
        return;
    }

    if state.subs.len() >= PUBSUB_MAX_SUBSCRIPTIONS {
        error!("configured maximum subscriptions exceeded");
        conns.return_err(handle, GgError::Nomem);
        return;
    }

    conns.sub_accept(handle, Some(release_subscription));
    state.subs.push(SubEntry {
        handle,
        filter: filter.to_vec(),
    });
    debug!("registered subscription for {}", String::from_utf8_lossy(filter));
}

fn release_subscription(state: &mut PubSubState, handle: Handle) {
    state.subs.retain(|sub| sub.handle != handle);
}

/// Validate an MQTT-style topic filter: `+` and `#` must be whole levels,
/// and `#` only as the final level.
pub fn topic_filter_is_valid(filter: &[u8]) -> bool {
    if filter.is_empty() {
        return false;
    }

    let mut saw_hash = false;
    for level in filter.split(|b| *b == b'/') {
        if saw_hash {
            return false;
        }
        match level {
            b"#" => saw_hash = true,
            b"+" => {}
            _ => {
                if level.contains(&b'#') || level.contains(&b'+') {
                    return false;
                }
            }
        }
    }
    true
}

/// Match a topic against a filter, level by level. `+` matches exactly one
/// level; `#` matches the whole remainder.
pub fn topic_filter_matches(filter: &[u8], topic: &[u8]) -> bool {
    let mut filter_levels = filter.split(|b| *b == b'/');
    let mut topic_levels = topic.split(|b| *b == b'/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(b"#"), _) => return true,
            (Some(f), Some(t)) => {
                if f != b"+" && f != t {
                    return false;
                }
            }
            (None, None) => return true,
            (Some(_), None) | (None, Some(_)) => return false,
        }
    }
}
