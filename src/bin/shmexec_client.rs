// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Interactive client. `--help` prints the command catalogue; otherwise a
// prompt loop runs until `exit` is typed or input ends. Commands are
// validated locally against the catalogue before they hit the wire.

use std::io::Write;
use std::path::Path;

use shmexec::client::read_command_line;
use shmexec::{commands, signals, ClientConfig, ClientConnection, Error, SERVER_SHM_NAME};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h") {
        print!("{}", commands::help_text());
        std::process::exit(0);
    }
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let config = match ClientConfig::load(Path::new(ClientConfig::PATH)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load the client configuration: {e}");
            return 1;
        }
    };
    if let Err(e) = signals::install(&[
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGTERM,
        signals::TEARDOWN_SIGNAL,
        signals::RESPONSE_DEADLINE_SIGNAL,
    ]) {
        eprintln!("cannot install signal handlers: {e}");
        return 1;
    }

    let conn = match ClientConnection::establish(config, SERVER_SHM_NAME) {
        Ok(conn) => conn,
        Err(Error::ServerBusy) => {
            eprintln!("The server is overloaded, please try again later");
            return 1;
        }
        Err(e) => {
            eprintln!("cannot connect to the server: {e}");
            return 1;
        }
    };

    loop {
        if let Some(sig) = signals::take() {
            return on_signal(&conn, sig);
        }
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match read_command_line() {
            Ok(Some(line)) => line,
            Ok(None) => return finish(&conn), // end of input
            Err(Error::Interrupted) => continue, // picked up at the loop top
            Err(e) => {
                eprintln!("cannot read the command: {e}");
                conn.cleanup();
                return 1;
            }
        };
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        if !commands::is_command_available(cmd) {
            eprintln!("Invalid command: {cmd}");
            continue;
        }
        if cmd == shmexec::EXIT_SENTINEL {
            return finish(&conn);
        }

        match conn.execute(cmd) {
            Ok(Some(payload)) => print_payload(&payload),
            Ok(None) => {
                println!("The server is not responding. Disconnecting...");
                conn.cleanup();
                return 0;
            }
            Err(Error::Timeout) => {
                eprintln!("The server is too overloaded to receive the request; disconnecting");
                conn.cleanup();
                return 1;
            }
            Err(Error::Interrupted) => continue,
            Err(e) => {
                eprintln!("cannot exchange with the server: {e}");
                conn.cleanup();
                return 1;
            }
        }
    }
}

fn print_payload(payload: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(payload);
    if !payload.ends_with(b"\n") {
        let _ = out.write_all(b"\n");
    }
    let _ = out.flush();
}

/// Sentinel exchange: send `exit`, print the farewell, remove the pipes.
fn finish(conn: &ClientConnection) -> i32 {
    let code = match conn.send_exit() {
        Ok(Some(payload)) => {
            print_payload(&payload);
            0
        }
        Ok(None) | Err(_) => {
            eprintln!("Could not exchange the end-of-session request with the server");
            1
        }
    };
    conn.cleanup();
    code
}

fn on_signal(conn: &ClientConnection, sig: libc::c_int) -> i32 {
    match sig {
        signals::TEARDOWN_SIGNAL => {
            eprintln!("\nThe server shut down abruptly; you have been disconnected");
            conn.cleanup();
            0
        }
        signals::RESPONSE_DEADLINE_SIGNAL => {
            eprintln!("The response took too long to send: you have been disconnected.");
            conn.cleanup();
            0
        }
        _ => {
            // SIGINT / SIGQUIT / SIGTERM: leave politely.
            println!("\nDisconnecting from the server (signal)...");
            finish(conn)
        }
    }
}
