// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

#[derive(Parser)]
struct Cli {
    /// Directory holding the bus sockets.
    #[arg(long, default_value = core_bus::DEFAULT_SOCKET_DIR)]
    socket_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Cli::parse();

    let err = ggpubsubd::run_ggpubsubd(&args.socket_dir);
    error!("exiting with error: {err}");
    ExitCode::FAILURE
}
