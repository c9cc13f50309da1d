// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Error taxonomy shared by the connection substrate. The ring layer never
// exits the process; every failure is surfaced here so the dispatcher can
// decide. Timeout-shaped outcomes at the pipe layer are reported through
// `Ok(false)` / `Ok(None)` return values and only become `Error::Timeout`
// where a caller needs a single error path.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Null / oversized path, unknown command, malformed configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// mmap / shm_open / shm_unlink failure on the admission ring.
    #[error("shared memory failure")]
    SharedMemory(#[source] io::Error),

    /// The well-known shared-memory name is already owned by another server.
    #[error("shared memory name already in use")]
    AlreadyInUse,

    /// sem_init / sem_wait / sem_post failure on a ring semaphore.
    #[error("semaphore failure")]
    Semaphore(#[source] io::Error),

    /// open / read / write / unlink failure on a named pipe.
    #[error("pipe failure")]
    Pipe(#[source] io::Error),

    /// Allocation or thread-spawn failure while admitting a client.
    #[error("out of memory")]
    OutOfMemory,

    /// Admission deadline elapsed while the ring was full.
    #[error("server admission queue is full")]
    ServerBusy,

    /// A response or request deadline elapsed.
    #[error("deadline elapsed")]
    Timeout,

    /// A blocking wait was interrupted by a signal; the caller may retry.
    #[error("interrupted by signal")]
    Interrupted,
}

impl Error {
    /// Whether the error came from a signal interrupting a blocking call.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}
