// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Server main loop. Drains the admission ring, spawns one detached worker
// per admitted client, and tears everything down when a signal asks for it.
//
// The teardown signals stay unblocked only on the dispatcher thread: workers
// are spawned under a temporary mask, so an interrupt always lands where the
// semaphore wait can surface it and the main loop can break. The handler
// itself just records the signal number; the broadcast to clients and the
// ring unlink run on the normal return path.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::registry::{ClientRegistry, SessionHandle};
use crate::ring::{AdmissionRecord, AdmissionRing};
use crate::session::{CommandHandler, HandlerOutcome, Session};
use crate::signals;
use crate::{EXIT_SENTINEL, FAREWELL, SERVER_SHM_NAME};

/// Why a worker ended its session. Every session ends in exactly one of
/// these, or in process exit during server teardown.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client sent the `exit` sentinel.
    Sentinel,
    /// A pipe operation failed; the session is unusable.
    PipeError(Error),
    /// The response deadline expired; the client was signalled.
    ResponseDeadline,
}

pub struct Dispatcher<H: CommandHandler + 'static> {
    ring: AdmissionRing,
    registry: Arc<ClientRegistry>,
    config: ServerConfig,
    handler: Arc<H>,
}

impl<H: CommandHandler + 'static> Dispatcher<H> {
    /// Install signal handlers and create the admission ring under the
    /// well-known name. Fails with [`Error::AlreadyInUse`] when another
    /// server already owns it.
    pub fn new(config: ServerConfig, handler: H) -> Result<Self> {
        Self::with_ring_name(config, handler, SERVER_SHM_NAME)
    }

    pub fn with_ring_name(config: ServerConfig, handler: H, ring_name: &str) -> Result<Self> {
        signals::install(&[libc::SIGINT, libc::SIGQUIT, libc::SIGTERM])
            .map_err(|e| Error::InvalidArgument(format!("cannot install signal handlers: {e}")))?;
        signals::ignore(libc::SIGPIPE)
            .map_err(|e| Error::InvalidArgument(format!("cannot ignore SIGPIPE: {e}")))?;
        let ring = AdmissionRing::create(ring_name, config.slots)?;
        Ok(Self {
            ring,
            registry: Arc::new(ClientRegistry::new()),
            config,
            handler: Arc::new(handler),
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Main loop: block on the ring until a record arrives, admit it, repeat
    /// until a teardown signal interrupts the wait.
    pub fn run(self) -> Result<()> {
        info!(
            "admission ring ready ({} slots); listening for clients",
            self.ring.capacity()
        );
        loop {
            if signals::pending().is_some() {
                break;
            }
            let fetched = self.ring.consume(|record| self.admit(record));
            match fetched {
                Ok(Ok(pid)) => info!("connection established with client {pid}"),
                // Admission failures are per-client; the slot is freed
                // either way and the server keeps serving.
                Ok(Err(e)) => warn!("could not admit client: {e}"),
                Err(Error::Interrupted) => continue,
                Err(e) => {
                    error!("admission ring failure: {e}");
                    self.teardown();
                    return Err(e);
                }
            }
        }
        let sig = signals::take().unwrap_or(0);
        info!("teardown requested by signal {sig}");
        self.teardown();
        Ok(())
    }

    /// Signal every live client, then unlink the ring. Worker threads die
    /// with the process.
    fn teardown(self) {
        let mut notified = 0usize;
        self.registry.broadcast(|rec| {
            signals::kill_quiet(rec.pid(), signals::TEARDOWN_SIGNAL);
            notified += 1;
        });
        info!("notified {notified} connected client(s)");
        if let Err(e) = self.ring.teardown() {
            warn!("could not release the admission ring: {e}");
        }
    }

    /// Ring consume handler: copy the record into a fresh session slot,
    /// register it, and hand it to a detached worker.
    fn admit(&self, record: &AdmissionRecord) -> Result<i32> {
        let record = *record; // the ring slot is free once this returns
        let pid = record.pid();
        let handle = self.registry.add(record);

        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(&self.handler);
        let response_limit = self.config.response_limit;
        let response_deadline = self.config.response_deadline();

        // Spawn under a mask so the worker never steals a teardown signal
        // from the dispatcher thread.
        let mask = signals::block_teardown_signals()
            .map_err(|e| Error::InvalidArgument(format!("cannot mask worker signals: {e}")));
        let mask = match mask {
            Ok(m) => m,
            Err(e) => {
                self.registry.remove(handle);
                return Err(e);
            }
        };
        let spawned = thread::Builder::new()
            .name(format!("client-{pid}"))
            .spawn(move || {
                worker(record, handle, registry, handler, response_limit, response_deadline)
            });
        drop(mask);

        match spawned {
            Ok(join) => {
                drop(join); // detached: the worker owns its session
                Ok(pid)
            }
            Err(err) => {
                self.registry.remove(handle);
                warn!("thread spawn failed for client {pid}: {err}");
                Err(Error::OutOfMemory)
            }
        }
    }

}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn worker<H: CommandHandler>(
    record: AdmissionRecord,
    handle: SessionHandle,
    registry: Arc<ClientRegistry>,
    handler: Arc<H>,
    response_limit: i64,
    response_deadline: Option<Duration>,
) {
    let pid = record.pid();
    // Opening
    match Session::open(record) {
        Ok(mut session) => {
            let end = serve_session(&mut session, &*handler, response_limit, response_deadline);
            match end {
                SessionEnd::Sentinel => info!("client {pid} disconnected"),
                SessionEnd::ResponseDeadline => {
                    warn!("client {pid} did not read its response in time")
                }
                SessionEnd::PipeError(e) => warn!("session with client {pid} aborted: {e}"),
            }
        }
        Err(e) => warn!("cannot open pipes for client {pid}: {e}"),
    }
    // Closing: the session dropped above; the registry entry goes last.
    if !registry.remove(handle) {
        warn!("client {pid} was not in the registry at worker exit");
    }
}

/// The per-session request/response loop.
///
/// Receiving: one frame per blocking read, no timeout. Executing: the
/// command handler fills the sink; empty and unknown commands produce a
/// diagnostic and the session stays up. Closing: on the sentinel the
/// farewell is sent best-effort; on a response deadline the client gets
/// [`signals::RESPONSE_DEADLINE_SIGNAL`] before the worker exits.
pub fn serve_session<H: CommandHandler + ?Sized>(
    session: &mut Session,
    handler: &H,
    response_limit: i64,
    response_deadline: Option<Duration>,
) -> SessionEnd {
    loop {
        // Receiving
        let cmd = match session.reader().read_command() {
            Ok(cmd) => cmd,
            Err(e) => return SessionEnd::PipeError(e),
        };
        if cmd == EXIT_SENTINEL {
            // Closing
            let _ = session
                .writer()
                .send(FAREWELL.as_bytes(), response_limit, response_deadline);
            return SessionEnd::Sentinel;
        }

        // Executing
        {
            let (ctx, sink) = session.context_and_sink();
            let outcome = handler.handle(&ctx, &cmd, sink);
            if outcome != HandlerOutcome::Ok && sink.is_empty() {
                sink.extend_from_slice(b"Command produced no output and failed\n");
            }
        }

        match session
            .writer()
            .send(session.last_response(), response_limit, response_deadline)
        {
            Ok(true) => {} // back to Receiving
            Ok(false) => {
                signals::kill_quiet(session.pid(), signals::RESPONSE_DEADLINE_SIGNAL);
                return SessionEnd::ResponseDeadline;
            }
            Err(e) => return SessionEnd::PipeError(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Daemonisation
// ---------------------------------------------------------------------------

/// Double-fork into the background, detach from the session, and point the
/// standard descriptors at /dev/null. The working directory is kept so
/// relative pipe and config paths stay valid.
pub fn daemonize() -> io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }
        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }
        let fd = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        libc::dup2(fd, libc::STDIN_FILENO);
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }
    }
    Ok(())
}
