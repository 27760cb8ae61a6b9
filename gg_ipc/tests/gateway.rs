// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

// End-to-end gateway tests: a pubsub daemon, a stand-in config daemon, and
// the gateway run in threads against a per-test socket directory. The
// gateway runs with authentication disabled since the tests are not
// systemd services.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde_json::json;

use core_bus::server::{Conns, MethodDesc};
use core_bus::{client as bus_client, server as bus_server, tlv, Handle};
use gg_ipc::client::{IpcClient, IpcClientError};
use gg_ipc::error::IpcErrorCode;
use gg_ipc::gateway::{run_ggipcd, GatewayConfig};
use gg_ipc::GG_IPC_SOCKET_NAME;
use gg_lib::{Arena, GgError, Kv, Map, Object, SchemaEntry, Tag};

// A minimal config daemon: stores values per key path, TLV-encoded.
#[derive(Default)]
struct ConfigState {
    entries: Vec<(String, Vec<u8>)>,
}

fn joined_key_path(params: Map<'_>) -> Option<String> {
    let path = params.get(b"key_path")?.as_list()?;
    let mut joined = String::new();
    for part in path {
        let part = part.as_buf()?;
        joined.push('/');
        joined.push_str(std::str::from_utf8(part).ok()?);
    }
    Some(joined)
}

fn rpc_config_read(
    state: &mut ConfigState,
    conns: &mut Conns<ConfigState>,
    params: Map<'_>,
    handle: Handle,
) {
    let Some(key) = joined_key_path(params) else {
        conns.return_err(handle, GgError::Invalid);
        return;
    };
    let Some((_, encoded)) = state.entries.iter().find(|(k, _)| *k == key) else {
        conns.return_err(handle, GgError::NoEntry);
        return;
    };

    let mut mem = vec![0u8; 4096];
    let mut arena = Arena::new(&mut mem);
    let mut input = encoded.as_slice();
    match tlv::decode_obj(&mut input, &mut arena) {
        Ok(value) => conns.respond(handle, value),
        Err(e) => conns.return_err(handle, e),
    }
}

fn rpc_config_write(
    state: &mut ConfigState,
    conns: &mut Conns<ConfigState>,
    params: Map<'_>,
    handle: Handle,
) {
    let validated = params.validate([
        SchemaEntry {
            key: b"value",
            required: true,
            typ: None,
        },
        SchemaEntry::required(b"timestamp", Tag::I64),
    ]);
    let value = match (joined_key_path(params), validated) {
        (Some(_), Ok([Some(value), _])) => value,
        _ => {
            conns.return_err(handle, GgError::Invalid);
            return;
        }
    };
    let key = joined_key_path(params).unwrap();

    let mut encoded = Vec::new();
    if tlv::encode_obj(value, &mut encoded).is_err() {
        conns.return_err(handle, GgError::Range);
        return;
    }

    state.entries.retain(|(k, _)| *k != key);
    state.entries.push((key, encoded));
    conns.respond(handle, Object::Null);
}

const CONFIG_HANDLERS: &[MethodDesc<ConfigState>] = &[
    MethodDesc {
        name: "read",
        is_subscription: false,
        handler: rpc_config_read,
    },
    MethodDesc {
        name: "write",
        is_subscription: false,
        handler: rpc_config_write,
    },
];

fn start_stack() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let socket_dir = dir.path().to_path_buf();

    let pubsub_dir = socket_dir.clone();
    thread::spawn(move || {
        let _ = ggpubsubd::run_ggpubsubd(&pubsub_dir);
    });

    let config_dir = socket_dir.clone();
    thread::spawn(move || {
        let _ = bus_server::listen(
            &config_dir,
            "gg_config",
            CONFIG_HANDLERS,
            ConfigState::default(),
        );
    });

    let gateway_dir = socket_dir.clone();
    thread::spawn(move || {
        let _ = run_ggipcd(GatewayConfig {
            socket_dir: gateway_dir,
            insecure_auth: true,
        });
    });

    for name in [
        ggpubsubd::PUBSUB_INTERFACE.to_string(),
        "gg_config".to_string(),
        GG_IPC_SOCKET_NAME.to_string(),
    ] {
        wait_for_socket(&socket_dir.join(name));
    }

    (dir, socket_dir)
}

fn wait_for_socket(path: &Path) {
    let mut counter = 100;
    loop {
        match UnixStream::connect(path) {
            Ok(_) => return,
            Err(_) if counter > 0 => {
                counter -= 1;
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("server at {} never came up: {e}", path.display()),
        }
    }
}

fn connect(socket_dir: &Path, name: &str) -> IpcClient {
    IpcClient::connect_named(&socket_dir.join(GG_IPC_SOCKET_NAME), Some(name)).unwrap()
}

#[test]
fn handshake_issues_a_stable_svcuid() {
    let (_dir, socket_dir) = start_stack();

    let client = connect(&socket_dir, "comp.handshake");
    let first = client.svcuid().to_owned();
    assert!(!first.is_empty());

    // The same component reconnecting gets the same svcuid.
    let client = connect(&socket_dir, "comp.handshake");
    assert_eq!(client.svcuid(), first);
}

#[test]
fn publish_to_topic_reaches_bus_subscribers() {
    let (_dir, socket_dir) = start_stack();

    let filter = [Kv::new(b"topic_filter", Object::Buf(b"gw/#"))];
    let mut bus_sub = bus_client::subscribe(
        &socket_dir,
        ggpubsubd::PUBSUB_INTERFACE,
        "subscribe",
        Map::new(&filter),
    )
    .unwrap();

    let mut client = connect(&socket_dir, "comp.pub");
    let response = client
        .call(
            "aws.greengrass#PublishToTopic",
            &json!({"topic": "gw/hello", "payload": "Hi"}),
        )
        .unwrap();
    assert!(response.is_null());

    let mut mem = vec![0u8; 2048];
    let mut arena = Arena::new(&mut mem);
    let obj = bus_sub
        .next_timeout(Duration::from_secs(2), &mut arena)
        .unwrap()
        .expect("subscription closed early");
    let map = obj.into_map();
    assert_eq!(map.get(b"topic").unwrap().into_buf(), b"gw/hello");
    assert_eq!(map.get(b"payload").unwrap().into_buf(), b"Hi");
}

#[test]
fn subscribe_to_topic_streams_until_terminated() {
    let (_dir, socket_dir) = start_stack();

    let mut client = connect(&socket_dir, "comp.sub");
    let stream_id = client
        .subscribe(
            "aws.greengrass#SubscribeToTopic",
            &json!({"topic": "notif/#"}),
        )
        .unwrap();
    assert!(stream_id > 0);

    let pairs = [
        Kv::new(b"topic", Object::Buf(b"notif/a")),
        Kv::new(b"payload", Object::Buf(b"one")),
    ];
    let mut mem = vec![0u8; 2048];
    let mut arena = Arena::new(&mut mem);
    bus_client::call(
        &socket_dir,
        ggpubsubd::PUBSUB_INTERFACE,
        "publish",
        Map::new(&pairs),
        &mut arena,
    )
    .unwrap();

    let event = client.recv().unwrap();
    assert_eq!(event.stream_id, stream_id);
    assert!(event.error.is_none());
    assert!(!event.terminated);
    assert_eq!(event.payload["topic"], json!("notif/a"));
    assert_eq!(event.payload["payload"], json!("one"));

    client.terminate_stream(stream_id).unwrap();
    // Allow the gateway to tear the bridge down.
    thread::sleep(Duration::from_millis(400));

    let mut mem = vec![0u8; 2048];
    let mut arena = Arena::new(&mut mem);
    bus_client::call(
        &socket_dir,
        ggpubsubd::PUBSUB_INTERFACE,
        "publish",
        Map::new(&pairs),
        &mut arena,
    )
    .unwrap();

    client.set_recv_timeout(Some(Duration::from_millis(300))).unwrap();
    match client.recv() {
        Err(IpcClientError::Protocol(GgError::Failure)) => {}
        other => panic!("expected a recv timeout, got {other:?}"),
    }
}

#[test]
fn configuration_round_trips_through_the_gateway() {
    let (_dir, socket_dir) = start_stack();

    let mut client = connect(&socket_dir, "comp.config");

    client
        .call(
            "aws.greengrass#UpdateConfiguration",
            &json!({
                "keyPath": ["services", "demo", "state"],
                "valueToMerge": "READY",
                "timestamp": 17,
            }),
        )
        .unwrap();

    let value = client
        .call(
            "aws.greengrass#GetConfiguration",
            &json!({"keyPath": ["services", "demo", "state"]}),
        )
        .unwrap();
    assert_eq!(value, json!("READY"));
}

#[test]
fn unknown_operations_are_resource_not_found() {
    let (_dir, socket_dir) = start_stack();

    let mut client = connect(&socket_dir, "comp.unknown");
    let err = client
        .call("aws.greengrass#DoesNotExist", &json!({}))
        .unwrap_err();

    match err {
        IpcClientError::Service { code, .. } => {
            assert_eq!(code, IpcErrorCode::ResourceNotFoundError);
        }
        other => panic!("expected a service error, got {other}"),
    }
}

#[test]
fn schema_violations_are_invalid_arguments() {
    let (_dir, socket_dir) = start_stack();

    let mut client = connect(&socket_dir, "comp.schema");
    let err = client
        .call("aws.greengrass#PublishToTopic", &json!({"payload": "Hi"}))
        .unwrap_err();

    match err {
        IpcClientError::Service { code, .. } => {
            assert_eq!(code, IpcErrorCode::InvalidArgumentsError);
        }
        other => panic!("expected a service error, got {other}"),
    }
}

#[test]
fn missing_config_keys_surface_as_resource_not_found() {
    let (_dir, socket_dir) = start_stack();

    let mut client = connect(&socket_dir, "comp.missing");
    let err = client
        .call(
            "aws.greengrass#GetConfiguration",
            &json!({"keyPath": ["services", "nope"]}),
        )
        .unwrap_err();

    match err {
        IpcClientError::Service { code, .. } => {
            assert_eq!(code, IpcErrorCode::ResourceNotFoundError);
        }
        other => panic!("expected a service error, got {other}"),
    }
}
