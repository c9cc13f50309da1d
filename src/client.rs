// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Client-side connection: attach the server's admission ring, create the
// per-process pipe pair, enqueue the admission record, then alternate
// request frames and length-prefixed responses until the sentinel.
//
// The client owns both FIFO files and removes them on every exit path; the
// ring is only unmapped, never unlinked, when the connection drops.

use std::io;

use log::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::fifo::{RequestPipe, ResponseReceiver};
use crate::ring::{AdmissionRecord, AdmissionRing};
use crate::{request_pipe_path, response_pipe_path, EXIT_SENTINEL};

pub struct ClientConnection {
    _ring: AdmissionRing,
    request: RequestPipe,
    response: ResponseReceiver,
    config: ClientConfig,
    pid: i32,
}

impl ClientConnection {
    /// Connect to the server behind `ring_name`.
    ///
    /// Creates `./tmp` and the pipe pair, then enqueues the admission record
    /// with the configured request deadline. [`Error::ServerBusy`] means the
    /// ring stayed full for the whole deadline.
    pub fn establish(config: ClientConfig, ring_name: &str) -> Result<Self> {
        std::fs::create_dir_all("./tmp").map_err(Error::Pipe)?;
        let pid = unsafe { libc::getpid() };
        let request = RequestPipe::create(&request_pipe_path(pid))?;
        let response = ResponseReceiver::create(&response_pipe_path(pid))?;

        let ring = AdmissionRing::attach(ring_name)?;
        let record = AdmissionRecord::for_current_process(request.path(), response.path())?;
        ring.produce(&record, config.request_deadline())?;
        debug!("admission record queued for pid {pid}");

        Ok(Self {
            _ring: ring,
            request,
            response,
            config,
            pid,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Send one command and wait for its response.
    ///
    /// `Err(Timeout)` means the request frame could not be written within
    /// `req_timeout`; `Ok(None)` means the server did not answer within
    /// `res_timeout`.
    pub fn execute(&self, cmd: &str) -> Result<Option<Vec<u8>>> {
        if !self.request.send(cmd, self.config.request_deadline())? {
            return Err(Error::Timeout);
        }
        self.response.recv(self.config.response_deadline())
    }

    /// Perform the sentinel exchange and return the farewell payload.
    pub fn send_exit(&self) -> Result<Option<Vec<u8>>> {
        self.execute(EXIT_SENTINEL)
    }

    /// Remove both pipe files. Also happens on drop; exposed so signal paths
    /// can clean up before exiting.
    pub fn cleanup(&self) {
        self.request.remove();
        self.response.remove();
    }
}

/// Read one line from standard input with raw read(2), so a signal arriving
/// mid-read surfaces as [`Error::Interrupted`] instead of being retried
/// behind the caller's back. Returns `Ok(None)` at end of input.
pub fn read_command_line() -> Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                byte.as_mut_ptr() as *mut libc::c_void,
                1,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Err(Error::Interrupted);
            }
            return Err(Error::Pipe(err));
        }
        if n == 0 {
            // End of input; a partial final line still counts.
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
