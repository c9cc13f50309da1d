// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Process-shared counting semaphores living inside a mapped shared-memory
// region. The ring header embeds three of them; this wrapper only ever
// borrows a pointer into that mapping and never owns storage itself.

use std::io;
use std::time::Duration;

use crate::error::{Error, Result};

/// A view over a `sem_t` embedded in shared memory.
#[derive(Clone, Copy)]
pub struct SharedSem {
    sem: *mut libc::sem_t,
}

unsafe impl Send for SharedSem {}
unsafe impl Sync for SharedSem {}

impl SharedSem {
    /// Initialise the semaphore in-place with `value`, shared across
    /// processes.
    ///
    /// # Safety
    /// `sem` must point into a mapped region large enough for a `sem_t`,
    /// and no other process may be using it yet.
    pub unsafe fn init(sem: *mut libc::sem_t, value: u32) -> Result<Self> {
        if libc::sem_init(sem, 1, value as libc::c_uint) != 0 {
            return Err(Error::Semaphore(io::Error::last_os_error()));
        }
        Ok(Self { sem })
    }

    /// Wrap an already-initialised semaphore.
    ///
    /// # Safety
    /// `sem` must point to a live, initialised, process-shared `sem_t`.
    pub unsafe fn at(sem: *mut libc::sem_t) -> Self {
        Self { sem }
    }

    /// Block until the semaphore can be decremented.
    /// A signal arriving mid-wait surfaces as [`Error::Interrupted`].
    pub fn wait(&self) -> Result<()> {
        if unsafe { libc::sem_wait(self.sem) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Err(Error::Interrupted);
            }
            return Err(Error::Semaphore(err));
        }
        Ok(())
    }

    /// Like [`wait`](Self::wait) with a relative deadline.
    /// Returns `Ok(false)` when the deadline expires first.
    pub fn timed_wait(&self, timeout: Duration) -> Result<bool> {
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        let ns_total = ts.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        ts.tv_sec += timeout.as_secs() as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
        ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;

        if unsafe { libc::sem_timedwait(self.sem, &ts) } != 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => Ok(false),
                Some(libc::EINTR) => Err(Error::Interrupted),
                _ => Err(Error::Semaphore(err)),
            };
        }
        Ok(true)
    }

    /// Decrement without blocking. Returns `Ok(false)` when the semaphore
    /// is already at zero.
    pub fn try_wait(&self) -> Result<bool> {
        if unsafe { libc::sem_trywait(self.sem) } != 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) => Ok(false),
                Some(libc::EINTR) => Err(Error::Interrupted),
                _ => Err(Error::Semaphore(err)),
            };
        }
        Ok(true)
    }

    /// Increment the semaphore, waking one waiter.
    pub fn post(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(Error::Semaphore(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Current counter value, for diagnostics and tests.
    pub fn value(&self) -> Result<i32> {
        let mut v: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem, &mut v) } != 0 {
            return Err(Error::Semaphore(io::Error::last_os_error()));
        }
        Ok(v)
    }
}
