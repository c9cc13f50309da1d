// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Flag-based signal handling. The handler only records the signal number;
// blocking calls surface the interruption as `Error::Interrupted` and the
// normal control flow picks the flag up. Heavy teardown work never runs
// inside the handler.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

/// Signal the server broadcasts to every client on emergency teardown.
pub const TEARDOWN_SIGNAL: libc::c_int = libc::SIGUSR1;

/// Signal a worker sends its client when the response deadline expires.
pub const RESPONSE_DEADLINE_SIGNAL: libc::c_int = libc::SIGUSR2;

static PENDING: AtomicI32 = AtomicI32::new(0);

extern "C" fn note_signal(sig: libc::c_int) {
    PENDING.store(sig, Ordering::Release);
}

/// Install the flag-recording handler for each signal in `sigs`.
/// SA_RESTART is deliberately absent so blocking syscalls return EINTR and
/// the caller reaches [`take`].
pub fn install(sigs: &[libc::c_int]) -> io::Result<()> {
    for &sig in sigs {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = note_signal as *const () as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigfillset(&mut action.sa_mask);
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Absorb a signal process-wide (used for SIGPIPE so a vanished client
/// cannot crash a worker mid-write).
pub fn ignore(sig: libc::c_int) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_IGN;
        action.sa_flags = 0;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Consume the most recent recorded signal, if any.
pub fn take() -> Option<libc::c_int> {
    match PENDING.swap(0, Ordering::AcqRel) {
        0 => None,
        sig => Some(sig),
    }
}

/// Peek at the most recent recorded signal without consuming it.
pub fn pending() -> Option<libc::c_int> {
    match PENDING.load(Ordering::Acquire) {
        0 => None,
        sig => Some(sig),
    }
}

/// Blocks the teardown signals on the calling thread for the guard's
/// lifetime. Worker threads are spawned under this guard so delivery always
/// lands on the dispatcher thread, whose semaphore wait reports the
/// interruption.
pub struct MaskGuard {
    old: libc::sigset_t,
}

pub fn block_teardown_signals() -> io::Result<MaskGuard> {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGQUIT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        let mut old: libc::sigset_t = std::mem::zeroed();
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut old);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(MaskGuard { old })
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.old, std::ptr::null_mut());
        }
    }
}

/// Send `sig` to `pid`. A process that is already gone is not an error.
pub fn kill_quiet(pid: i32, sig: libc::c_int) {
    unsafe { libc::kill(pid as libc::pid_t, sig) };
}
