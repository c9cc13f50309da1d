// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Local multi-client command-execution service. Clients on the same host
// rendezvous with a long-lived server through a bounded shared-memory
// admission ring, then exchange framed commands and length-prefixed
// responses over a per-client pair of named pipes.

pub mod error;
pub use error::{Error, Result};

mod shm;
pub use shm::ShmHandle;

mod sem;
pub use sem::SharedSem;

pub mod ring;
pub use ring::{AdmissionRecord, AdmissionRing};

pub mod fifo;
pub use fifo::{RequestPipe, RequestReader, ResponseReceiver, ResponseWriter};

pub mod session;
pub use session::{CommandHandler, HandlerOutcome, RequestContext, Session};

pub mod registry;
pub use registry::{ClientRegistry, SessionHandle};

pub mod config;
pub use config::{ClientConfig, Config, ServerConfig};

pub mod signals;

pub mod commands;
pub use commands::CommandSet;

pub mod dispatcher;
pub use dispatcher::Dispatcher;

pub mod client;
pub use client::ClientConnection;

/// Well-known POSIX name of the server's admission ring.
pub const SERVER_SHM_NAME: &str = "/shm_server_963852741";

/// Maximum number of bytes in one command; the request frame is one byte
/// larger to carry the terminating NUL.
pub const MAX_COMMAND_LENGTH: usize = 256;

/// Maximum length of a pipe path stored in an admission record.
pub const PIPE_NAME_MAX: usize = 255;

/// Session-termination sentinel sent by the client in a request frame.
pub const EXIT_SENTINEL: &str = "exit";

/// Farewell payload sent by the server when a session ends on the sentinel.
pub const FAREWELL: &str = "Déconnexion du serveur...\n";

/// Filesystem path of the request pipe for a given client pid.
pub fn request_pipe_path(pid: i32) -> String {
    format!("./tmp/pipe_request_{pid}")
}

/// Filesystem path of the response pipe for a given client pid.
pub fn response_pipe_path(pid: i32) -> String {
    format!("./tmp/pipe_response_{pid}")
}
