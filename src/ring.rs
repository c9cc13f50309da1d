// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Bounded shared-memory admission ring: the rendezvous point where clients
// ask the server for a session. Classic bounded buffer guarded by three
// process-shared semaphores (binary mutex, empty = capacity, full = 0).
//
// Layout in shared memory, stable across client and server builds:
// a fixed header followed by `capacity` inline admission records. The
// records are bit-copied across address spaces and therefore carry no
// pointers, only inline NUL-terminated path arrays and scalar ids.

use std::ptr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sem::SharedSem;
use crate::shm::ShmHandle;
use crate::PIPE_NAME_MAX;

// ---------------------------------------------------------------------------
// AdmissionRecord
// ---------------------------------------------------------------------------

/// The fixed-size message a client places into the ring to request a session.
///
/// Invariant: both pipe paths are NUL-terminated within their arrays.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AdmissionRecord {
    request_pipe: [u8; PIPE_NAME_MAX + 1],
    response_pipe: [u8; PIPE_NAME_MAX + 1],
    pid: i32,
    uid: u32,
}

fn copy_path(dst: &mut [u8; PIPE_NAME_MAX + 1], src: &str) -> Result<()> {
    let bytes = src.as_bytes();
    if bytes.is_empty() {
        return Err(Error::InvalidArgument("empty pipe path".into()));
    }
    if bytes.len() > PIPE_NAME_MAX {
        return Err(Error::InvalidArgument(format!(
            "pipe path longer than {PIPE_NAME_MAX} bytes: {src:?}"
        )));
    }
    if bytes.contains(&0) {
        return Err(Error::InvalidArgument(format!(
            "pipe path contains NUL: {src:?}"
        )));
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    dst[bytes.len()] = 0;
    Ok(())
}

fn path_str(src: &[u8; PIPE_NAME_MAX + 1]) -> &str {
    let end = src.iter().position(|&b| b == 0).unwrap_or(PIPE_NAME_MAX);
    std::str::from_utf8(&src[..end]).unwrap_or("")
}

impl AdmissionRecord {
    pub fn new(request_pipe: &str, response_pipe: &str, pid: i32, uid: u32) -> Result<Self> {
        let mut rec = Self {
            request_pipe: [0; PIPE_NAME_MAX + 1],
            response_pipe: [0; PIPE_NAME_MAX + 1],
            pid,
            uid,
        };
        copy_path(&mut rec.request_pipe, request_pipe)?;
        copy_path(&mut rec.response_pipe, response_pipe)?;
        Ok(rec)
    }

    /// Record for the calling process, with pid and uid filled in.
    pub fn for_current_process(request_pipe: &str, response_pipe: &str) -> Result<Self> {
        let pid = unsafe { libc::getpid() };
        let uid = unsafe { libc::getuid() };
        Self::new(request_pipe, response_pipe, pid, uid)
    }

    pub fn request_pipe(&self) -> &str {
        path_str(&self.request_pipe)
    }

    pub fn response_pipe(&self) -> &str {
        path_str(&self.response_pipe)
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }
}

impl std::fmt::Debug for AdmissionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionRecord")
            .field("request_pipe", &self.request_pipe())
            .field("response_pipe", &self.response_pipe())
            .field("pid", &self.pid)
            .field("uid", &self.uid)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared layout
// ---------------------------------------------------------------------------

/// Header at the start of the region. Field widths are pinned so client and
/// server builds agree on the layout.
///
/// Invariants (observable outside the critical section):
///   0 <= length <= capacity
///   head == (tail + length) mod capacity
///   empty + full == capacity
#[repr(C)]
struct RingHeader {
    capacity: u64,
    head: u64,
    tail: u64,
    length: u64,
    mutex: libc::sem_t,
    empty: libc::sem_t,
    full: libc::sem_t,
}

const fn layout_size(capacity: usize) -> usize {
    std::mem::size_of::<RingHeader>() + capacity * std::mem::size_of::<AdmissionRecord>()
}

// ---------------------------------------------------------------------------
// AdmissionRing
// ---------------------------------------------------------------------------

/// The bounded cross-process mailbox decoupling clients (producers) from the
/// dispatcher (consumer).
pub struct AdmissionRing {
    shm: ShmHandle,
    owner: bool,
}

unsafe impl Send for AdmissionRing {}
unsafe impl Sync for AdmissionRing {}

impl AdmissionRing {
    /// Server side: create the region under `name` with exclusive-create and
    /// initialise the semaphores. Fails with [`Error::AlreadyInUse`] when
    /// another server owns the name.
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("ring capacity must be >= 1".into()));
        }
        let shm = ShmHandle::create_exclusive(name, layout_size(capacity))?;
        let hdr = shm.as_mut_ptr() as *mut RingHeader;
        unsafe {
            (*hdr).capacity = capacity as u64;
            (*hdr).head = 0;
            (*hdr).tail = 0;
            (*hdr).length = 0;
            SharedSem::init(ptr::addr_of_mut!((*hdr).mutex), 1)?;
            SharedSem::init(ptr::addr_of_mut!((*hdr).empty), capacity as u32)?;
            SharedSem::init(ptr::addr_of_mut!((*hdr).full), 0)?;
        }
        Ok(Self { shm, owner: true })
    }

    /// Client side: map the header alone to learn the capacity, then remap
    /// the full region. Detach is an unmap only; the client never unlinks.
    pub fn attach(name: &str) -> Result<Self> {
        let capacity = {
            let probe = ShmHandle::open(name, std::mem::size_of::<RingHeader>())?;
            let hdr = probe.as_ptr() as *const RingHeader;
            unsafe { (*hdr).capacity }
        };
        if capacity == 0 {
            return Err(Error::InvalidArgument(format!(
                "ring {name:?} is not initialised"
            )));
        }
        let shm = ShmHandle::open(name, layout_size(capacity as usize))?;
        Ok(Self { shm, owner: false })
    }

    fn hdr(&self) -> *mut RingHeader {
        self.shm.as_mut_ptr() as *mut RingHeader
    }

    fn record_ptr(&self, idx: u64) -> *mut AdmissionRecord {
        let base = unsafe { self.shm.as_mut_ptr().add(std::mem::size_of::<RingHeader>()) };
        unsafe { (base as *mut AdmissionRecord).add(idx as usize) }
    }

    fn mutex(&self) -> SharedSem {
        unsafe { SharedSem::at(ptr::addr_of_mut!((*self.hdr()).mutex)) }
    }

    fn empty(&self) -> SharedSem {
        unsafe { SharedSem::at(ptr::addr_of_mut!((*self.hdr()).empty)) }
    }

    fn full(&self) -> SharedSem {
        unsafe { SharedSem::at(ptr::addr_of_mut!((*self.hdr()).full)) }
    }

    /// Ring capacity, immutable after init.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.hdr()).capacity as usize }
    }

    /// Number of queued records. Racy by nature outside the critical
    /// section; meant for observation and tests.
    pub fn len(&self) -> usize {
        unsafe { (*self.hdr()).length as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter of the `empty` semaphore (free slots).
    pub fn slots_free(&self) -> Result<i32> {
        self.empty().value()
    }

    /// Counter of the `full` semaphore (queued records).
    pub fn slots_used(&self) -> Result<i32> {
        self.full().value()
    }

    /// Producer: copy `record` into the ring.
    ///
    /// Blocks while the ring is full. With a deadline the wait on `empty` is
    /// timed and expiry returns [`Error::ServerBusy`] without mutating any
    /// state. A signal mid-wait returns [`Error::Interrupted`]; the caller
    /// may retry.
    pub fn produce(&self, record: &AdmissionRecord, deadline: Option<Duration>) -> Result<()> {
        match deadline {
            Some(d) => {
                if !self.empty().timed_wait(d)? {
                    return Err(Error::ServerBusy);
                }
            }
            None => self.empty().wait()?,
        }
        if let Err(e) = self.mutex().wait() {
            // Hand the claimed slot back so empty + full stays at capacity.
            let _ = self.empty().post();
            return Err(e);
        }
        unsafe {
            let hdr = self.hdr();
            ptr::write(self.record_ptr((*hdr).head), *record);
            (*hdr).head = ((*hdr).head + 1) % (*hdr).capacity;
            (*hdr).length += 1;
        }
        self.mutex().post()?;
        self.full().post()?;
        Ok(())
    }

    /// Consumer: apply `apply` to the oldest record, then free the slot.
    ///
    /// The handler runs to completion before `tail` advances, so a slow
    /// consumer never leaks the slot to a concurrent producer.
    pub fn consume<R>(&self, apply: impl FnOnce(&AdmissionRecord) -> R) -> Result<R> {
        self.full().wait()?;
        if let Err(e) = self.mutex().wait() {
            let _ = self.full().post();
            return Err(e);
        }
        let r = unsafe {
            let hdr = self.hdr();
            let record = &*self.record_ptr((*hdr).tail);
            let r = apply(record);
            (*hdr).tail = ((*hdr).tail + 1) % (*hdr).capacity;
            (*hdr).length -= 1;
            r
        };
        self.mutex().post()?;
        self.empty().post()?;
        Ok(r)
    }

    /// Server side: destroy the ring. Holding the mutex guarantees no
    /// producer or consumer is mid-update; the unlink is idempotent across
    /// restarts.
    pub fn teardown(self) -> Result<()> {
        if !self.owner {
            return Err(Error::InvalidArgument(
                "only the creating server may tear the ring down".into(),
            ));
        }
        loop {
            match self.mutex().wait() {
                Err(Error::Interrupted) => continue,
                other => break other?,
            }
        }
        self.shm.unlink()
        // Unmap happens when `self.shm` drops.
    }
}
