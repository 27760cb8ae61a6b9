// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The public operation surface and its translation onto bus calls.
//!
//! Each operation declares the bus interface and method it maps to, plus a
//! schema check that rewrites the JSON request payload into the bus
//! parameter map. Streaming operations open a bus subscription instead of a
//! call.

use serde_json::{json, Value};

use crate::error::IpcErrorCode;

pub struct OpDesc {
    pub operation: &'static str,
    pub interface: &'static str,
    pub method: &'static str,
    pub streaming: bool,
    pub build_params: fn(&Value) -> Result<Value, IpcErrorCode>,
}

pub const OPERATIONS: &[OpDesc] = &[
    OpDesc {
        operation: "aws.greengrass#PublishToTopic",
        interface: "pubsub",
        method: "publish",
        streaming: false,
        build_params: publish_to_topic,
    },
    OpDesc {
        operation: "aws.greengrass#SubscribeToTopic",
        interface: "pubsub",
        method: "subscribe",
        streaming: true,
        build_params: subscribe_to_topic,
    },
    OpDesc {
        operation: "aws.greengrass#PublishToIoTCore",
        interface: "aws_iot_mqtt",
        method: "publish",
        streaming: false,
        build_params: publish_to_iot_core,
    },
    OpDesc {
        operation: "aws.greengrass#SubscribeToIoTCore",
        interface: "aws_iot_mqtt",
        method: "subscribe",
        streaming: true,
        build_params: subscribe_to_iot_core,
    },
    OpDesc {
        operation: "aws.greengrass#GetConfiguration",
        interface: "gg_config",
        method: "read",
        streaming: false,
        build_params: get_configuration,
    },
    OpDesc {
        operation: "aws.greengrass#UpdateConfiguration",
        interface: "gg_config",
        method: "write",
        streaming: false,
        build_params: update_configuration,
    },
    OpDesc {
        operation: "aws.greengrass.private#GetSystemConfig",
        interface: "gg_config",
        method: "read",
        streaming: false,
        build_params: get_system_config,
    },
];

pub fn find(operation: &[u8]) -> Option<&'static OpDesc> {
    OPERATIONS
        .iter()
        .find(|op| op.operation.as_bytes() == operation)
}

fn required_str<'v>(payload: &'v Value, key: &str) -> Result<&'v str, IpcErrorCode> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or(IpcErrorCode::InvalidArgumentsError)
}

fn optional_str<'v>(payload: &'v Value, key: &str) -> &'v str {
    payload.get(key).and_then(Value::as_str).unwrap_or("")
}

fn qos(payload: &Value) -> Result<i64, IpcErrorCode> {
    let qos = match payload.get("qos") {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| IpcErrorCode::InvalidArgumentsError)?,
        Some(v) => v.as_i64().ok_or(IpcErrorCode::InvalidArgumentsError)?,
    };
    if !(0..=2).contains(&qos) {
        return Err(IpcErrorCode::InvalidArgumentsError);
    }
    Ok(qos)
}

fn key_path(payload: &Value) -> Result<Vec<&str>, IpcErrorCode> {
    let entries = payload
        .get("keyPath")
        .and_then(Value::as_array)
        .ok_or(IpcErrorCode::InvalidArgumentsError)?;
    entries
        .iter()
        .map(|v| v.as_str().ok_or(IpcErrorCode::InvalidArgumentsError))
        .collect()
}

fn publish_to_topic(payload: &Value) -> Result<Value, IpcErrorCode> {
    let topic = required_str(payload, "topic")?;
    Ok(json!({
        "topic": topic,
        "payload": optional_str(payload, "payload"),
    }))
}

fn subscribe_to_topic(payload: &Value) -> Result<Value, IpcErrorCode> {
    let topic = required_str(payload, "topic")?;
    Ok(json!({ "topic_filter": topic }))
}

fn publish_to_iot_core(payload: &Value) -> Result<Value, IpcErrorCode> {
    let topic = required_str(payload, "topicName")?;
    Ok(json!({
        "topic": topic,
        "payload": optional_str(payload, "payload"),
        "qos": qos(payload)?,
    }))
}

fn subscribe_to_iot_core(payload: &Value) -> Result<Value, IpcErrorCode> {
    let topic = required_str(payload, "topicName")?;
    Ok(json!({
        "topic_filter": topic,
        "qos": qos(payload)?,
    }))
}

fn get_configuration(payload: &Value) -> Result<Value, IpcErrorCode> {
    let path = key_path(payload)?;
    let mut params = json!({ "key_path": path });
    if let Some(component) = payload.get("componentName").and_then(Value::as_str) {
        params["component_name"] = Value::from(component);
    }
    Ok(params)
}

fn update_configuration(payload: &Value) -> Result<Value, IpcErrorCode> {
    let path = key_path(payload)?;
    let value = payload
        .get("valueToMerge")
        .ok_or(IpcErrorCode::InvalidArgumentsError)?;
    let timestamp = match payload.get("timestamp") {
        None => return Err(IpcErrorCode::InvalidArgumentsError),
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .ok_or(IpcErrorCode::InvalidArgumentsError)?,
    };
    Ok(json!({
        "key_path": path,
        "value": value,
        "timestamp": timestamp,
    }))
}

fn get_system_config(payload: &Value) -> Result<Value, IpcErrorCode> {
    let key = required_str(payload, "key")?;
    Ok(json!({ "key_path": ["system", key] }))
}
