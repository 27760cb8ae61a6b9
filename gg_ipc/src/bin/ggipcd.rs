// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use gg_ipc::gateway::{run_ggipcd, GatewayConfig};

#[derive(Parser)]
struct Cli {
    /// Directory holding the bus sockets and the gateway socket.
    #[arg(long, default_value = core_bus::DEFAULT_SOCKET_DIR)]
    socket_dir: PathBuf,

    /// Trust client-supplied component identities. Development only.
    #[arg(long)]
    insecure_auth: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Cli::parse();

    let err = run_ggipcd(GatewayConfig {
        socket_dir: args.socket_dir,
        insecure_auth: args.insecure_auth,
    });
    error!("exiting with error: {err}");
    ExitCode::FAILURE
}
