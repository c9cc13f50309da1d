// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Per-client named-pipe channels.
//
// Request pipe: one fixed-size frame per command, client to server. The
// client creates and owns the file and re-opens it for write on each send;
// the server holds one read-write descriptor for the whole session so a
// blocking frame read never observes EOF when the writer count drops to
// zero between two sends.
//
// Response pipe: 8-byte little-endian length prefix followed by exactly
// that many payload bytes, server to client. The receiver reads in
// non-blocking mode behind poll(2) so the configured deadline is honoured.

use std::fs::File;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::MAX_COMMAND_LENGTH;

/// One request frame: the command plus its terminating NUL.
pub const FRAME_LEN: usize = MAX_COMMAND_LENGTH + 1;

/// Size of the response length prefix.
pub const LEN_PREFIX: usize = 8;

/// Backoff while waiting for the peer to open its end of a pipe.
const PEER_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn pipe_err(err: io::Error) -> Error {
    Error::Pipe(err)
}

fn make_fifo(path: &str) -> Result<()> {
    let cpath = std::ffi::CString::new(path.as_bytes())
        .map_err(|_| Error::InvalidArgument(format!("pipe path contains NUL: {path:?}")))?;
    if unsafe { libc::mkfifo(cpath.as_ptr(), libc::S_IRUSR | libc::S_IWUSR) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(pipe_err(err));
        }
    }
    Ok(())
}

fn unlink_quiet(path: &str) {
    if let Ok(cpath) = std::ffi::CString::new(path.as_bytes()) {
        unsafe { libc::unlink(cpath.as_ptr()) };
    }
}

fn open_raw(path: &str, flags: libc::c_int) -> io::Result<RawFd> {
    let cpath = std::ffi::CString::new(path.as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Wait for readiness on `fd`. Returns `Ok(false)` when the deadline passes
/// first; `None` deadline blocks indefinitely.
fn wait_ready(fd: RawFd, events: libc::c_short, deadline: Option<Instant>) -> Result<bool> {
    let timeout_ms: libc::c_int = match deadline {
        None => -1,
        Some(d) => {
            let remaining = d.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            remaining.as_millis().clamp(1, i32::MAX as u128) as libc::c_int
        }
    };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Err(Error::Interrupted);
        }
        return Err(pipe_err(err));
    }
    Ok(n > 0)
}

fn sleep_bounded(deadline: Option<Instant>) {
    let mut nap = PEER_POLL_INTERVAL;
    if let Some(d) = deadline {
        nap = nap.min(d.saturating_duration_since(Instant::now()));
    }
    if !nap.is_zero() {
        std::thread::sleep(nap);
    }
}

/// Open `path` write-only without blocking on a missing reader; retry until
/// the reader shows up or the deadline passes.
fn open_writer(path: &str, deadline: Option<Instant>) -> Result<Option<RawFd>> {
    loop {
        match open_raw(path, libc::O_WRONLY | libc::O_NONBLOCK) {
            Ok(fd) => return Ok(Some(fd)),
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        return Ok(None);
                    }
                }
                sleep_bounded(deadline);
            }
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => {
                return Err(Error::Interrupted)
            }
            Err(err) => return Err(pipe_err(err)),
        }
    }
}

/// Write all of `buf` to a non-blocking `fd`, gated on poll readiness.
/// Returns `Ok(false)` when the deadline passes before the last byte.
fn write_all_deadline(fd: RawFd, buf: &[u8], deadline: Option<Instant>) -> Result<bool> {
    let mut done = 0;
    while done < buf.len() {
        if !wait_ready(fd, libc::POLLOUT, deadline)? {
            return Ok(false);
        }
        let n = unsafe {
            libc::write(
                fd,
                buf[done..].as_ptr() as *const libc::c_void,
                buf.len() - done,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => continue,
                Some(libc::EINTR) => return Err(Error::Interrupted),
                _ => return Err(pipe_err(err)),
            }
        }
        done += n as usize;
    }
    Ok(true)
}

/// Read exactly `buf.len()` bytes from a non-blocking `fd` behind poll.
/// A zero-byte read means no writer is connected yet; keep waiting until
/// the deadline. Returns `Ok(false)` on expiry.
fn read_exact_deadline(fd: RawFd, buf: &mut [u8], deadline: Option<Instant>) -> Result<bool> {
    let mut got = 0;
    while got < buf.len() {
        if !wait_ready(fd, libc::POLLIN, deadline)? {
            return Ok(false);
        }
        let n = unsafe {
            libc::read(
                fd,
                buf[got..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - got,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => continue,
                Some(libc::EINTR) => return Err(Error::Interrupted),
                _ => return Err(pipe_err(err)),
            }
        }
        if n == 0 {
            // poll reported POLLHUP: no writer right now. Back off so the
            // wait does not spin, then re-check the deadline.
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Ok(false);
                }
            }
            sleep_bounded(deadline);
            continue;
        }
        got += n as usize;
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Request pipe — client writer
// ---------------------------------------------------------------------------

/// Client end of the request pipe. Creates and owns the FIFO; the file is
/// removed when the pipe is dropped or [`remove`](Self::remove)d.
pub struct RequestPipe {
    path: String,
}

impl RequestPipe {
    pub fn create(path: &str) -> Result<Self> {
        make_fifo(path)?;
        Ok(Self {
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send one command frame within `deadline`. Commands longer than
    /// [`MAX_COMMAND_LENGTH`] bytes are truncated to the frame; the excess
    /// is never queued as a second request. Returns `Ok(false)` on expiry.
    pub fn send(&self, cmd: &str, deadline: Option<Duration>) -> Result<bool> {
        let deadline = deadline.map(|d| Instant::now() + d);
        let mut frame = [0u8; FRAME_LEN];
        let bytes = cmd.as_bytes();
        let len = bytes.len().min(MAX_COMMAND_LENGTH);
        frame[..len].copy_from_slice(&bytes[..len]);

        let fd = match open_writer(&self.path, deadline)? {
            Some(fd) => fd,
            None => return Ok(false),
        };
        // Owns fd from here; closes on all paths.
        let file = unsafe { File::from_raw_fd(fd) };
        let sent = write_all_deadline(fd, &frame, deadline)?;
        drop(file);
        Ok(sent)
    }

    /// Remove the FIFO from the filesystem.
    pub fn remove(&self) {
        unlink_quiet(&self.path);
    }
}

impl Drop for RequestPipe {
    fn drop(&mut self) {
        self.remove();
    }
}

// ---------------------------------------------------------------------------
// Request pipe — server reader
// ---------------------------------------------------------------------------

/// Server end of the request pipe, held open for the whole session.
pub struct RequestReader {
    fd: RawFd,
}

impl RequestReader {
    /// Open the client-created FIFO. Read-write keeps the kernel writer
    /// count positive, so frame reads block between messages instead of
    /// returning EOF.
    pub fn open(path: &str) -> Result<Self> {
        let fd = open_raw(path, libc::O_RDWR).map_err(pipe_err)?;
        Ok(Self { fd })
    }

    /// Block until one full frame arrives and return the command it carries.
    /// There is deliberately no timeout: a worker waits until its client
    /// sends or the whole server goes down.
    pub fn read_command(&self) -> Result<String> {
        let mut frame = [0u8; FRAME_LEN];
        let mut got = 0;
        while got < FRAME_LEN {
            let n = unsafe {
                libc::read(
                    self.fd,
                    frame[got..].as_mut_ptr() as *mut libc::c_void,
                    FRAME_LEN - got,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(pipe_err(err));
            }
            if n == 0 {
                return Err(pipe_err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "request pipe closed mid-frame",
                )));
            }
            got += n as usize;
        }
        let end = frame
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_COMMAND_LENGTH);
        Ok(String::from_utf8_lossy(&frame[..end]).into_owned())
    }
}

impl Drop for RequestReader {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

// ---------------------------------------------------------------------------
// Response pipe — server writer
// ---------------------------------------------------------------------------

/// Server end of the response pipe; opens the FIFO write-only per send.
pub struct ResponseWriter {
    path: String,
}

impl ResponseWriter {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send one length-prefixed response within `timeout`.
    ///
    /// A non-negative `limit` caps the declared length at
    /// `min(payload.len(), limit)`; the payload is truncated to match, so
    /// the bytes on the wire always equal the prefix exactly. Returns
    /// `Ok(false)` when the deadline expires before the last byte (including
    /// when the receiver never opens its end).
    pub fn send(&self, payload: &[u8], limit: i64, timeout: Option<Duration>) -> Result<bool> {
        let declared = if limit >= 0 {
            payload.len().min(limit as usize)
        } else {
            payload.len()
        };
        let deadline = timeout.map(|t| Instant::now() + t);

        let fd = match open_writer(&self.path, deadline)? {
            Some(fd) => fd,
            None => return Ok(false),
        };
        let file = unsafe { File::from_raw_fd(fd) };
        let prefix = (declared as u64).to_le_bytes();
        if !write_all_deadline(fd, &prefix, deadline)? {
            return Ok(false);
        }
        let sent = write_all_deadline(fd, &payload[..declared], deadline)?;
        drop(file);
        Ok(sent)
    }
}

// ---------------------------------------------------------------------------
// Response pipe — client receiver
// ---------------------------------------------------------------------------

/// Client end of the response pipe. Creates and owns the FIFO and keeps a
/// non-blocking read descriptor for the whole connection.
pub struct ResponseReceiver {
    path: String,
    fd: RawFd,
}

impl ResponseReceiver {
    pub fn create(path: &str) -> Result<Self> {
        make_fifo(path)?;
        let fd = open_raw(path, libc::O_RDONLY | libc::O_NONBLOCK).map_err(pipe_err)?;
        Ok(Self {
            path: path.to_string(),
            fd,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receive one response within `timeout` (`None` blocks indefinitely).
    ///
    /// `Ok(Some(payload))` delivers exactly the bytes the prefix declared;
    /// `Ok(None)` means the deadline elapsed before the full payload
    /// arrived.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut prefix = [0u8; LEN_PREFIX];
        if !read_exact_deadline(self.fd, &mut prefix, deadline)? {
            return Ok(None);
        }
        let declared = u64::from_le_bytes(prefix) as usize;

        let mut payload = vec![0u8; declared];
        if !read_exact_deadline(self.fd, &mut payload, deadline)? {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Remove the FIFO from the filesystem.
    pub fn remove(&self) {
        unlink_quiet(&self.path);
    }
}

impl Drop for ResponseReceiver {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
        self.remove();
    }
}
