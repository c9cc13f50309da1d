// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Server entry point. No arguments: behaviour comes from ./conf/server.yml.
// Exits 0 on clean signal-driven shutdown, non-zero when initialisation
// fails or the ring breaks.

use std::path::Path;

use log::error;

use shmexec::{dispatcher, CommandSet, Dispatcher, Error, ServerConfig, SERVER_SHM_NAME};

fn main() {
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let config = match ServerConfig::load(Path::new(ServerConfig::PATH)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load the server configuration: {e}");
            return 1;
        }
    };

    if config.daemon {
        if let Err(e) = dispatcher::daemonize() {
            eprintln!("cannot detach into the background: {e}");
            return 1;
        }
    }

    let dispatcher = match Dispatcher::new(config, CommandSet) {
        Ok(d) => d,
        Err(Error::AlreadyInUse) => {
            eprintln!("another server already owns {SERVER_SHM_NAME}; is one running?");
            return 1;
        }
        Err(e) => {
            eprintln!("server initialisation failed: {e}");
            return 1;
        }
    };

    match dispatcher.run() {
        Ok(()) => 0,
        Err(e) => {
            error!("server stopped on error: {e}");
            1
        }
    }
}
