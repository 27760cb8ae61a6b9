// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! GG-IPC: the authenticated, event-stream-framed RPC endpoint exposed to
//! unprivileged component processes, and its translation onto the bus.

pub mod auth;
pub mod client;
pub mod error;
pub mod eventstream;
pub mod gateway;
pub mod json;
pub mod operations;

/// Socket file name of the gateway, under the runtime socket directory.
pub const GG_IPC_SOCKET_NAME: &str = "gg-ipc.socket";

/// Environment variable through which components receive the gateway
/// socket path.
pub const SOCKET_PATH_ENV: &str = "AWS_GG_NUCLEUS_DOMAIN_SOCKET_FILEPATH_FOR_COMPONENT";

/// Environment variable through which components receive their SVCUID.
pub const SVCUID_ENV: &str = "SVCUID";
