// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Thread-safe set of live client sessions. Entries live in a slab so a
// worker keeps only a stable handle, never a reference that could outlive
// removal. Insert at admission, remove before the worker returns, iterate
// once during the shutdown broadcast.

use std::sync::Mutex;

use slab::Slab;

use crate::ring::AdmissionRecord;

/// Stable handle to a registry entry. Valid from `add` until `remove` with
/// the same handle; the pid is carried so removal can verify identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    key: usize,
    pid: i32,
}

impl SessionHandle {
    pub fn pid(&self) -> i32 {
        self.pid
    }
}

/// Registry of live sessions, protected by a single mutex.
///
/// Invariant: each live session appears exactly once, from the instant its
/// admission returns success until its worker's finalizer runs. Iteration
/// never blocks on I/O — the shutdown broadcast only signals pids.
pub struct ClientRegistry {
    inner: Mutex<Slab<AdmissionRecord>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slab::new()),
        }
    }

    /// Append a session and return its stable handle.
    pub fn add(&self, record: AdmissionRecord) -> SessionHandle {
        let pid = record.pid();
        let mut slab = self.inner.lock().unwrap();
        let key = slab.insert(record);
        SessionHandle { key, pid }
    }

    /// Remove the entry behind `handle`. Returns `false` when the handle no
    /// longer matches a live entry with the same pid.
    pub fn remove(&self, handle: SessionHandle) -> bool {
        let mut slab = self.inner.lock().unwrap();
        match slab.get(handle.key) {
            Some(rec) if rec.pid() == handle.pid => {
                slab.remove(handle.key);
                true
            }
            _ => false,
        }
    }

    /// Apply `apply` to every live entry in a single traversal while holding
    /// the lock. `apply` must not block.
    pub fn broadcast<F: FnMut(&AdmissionRecord)>(&self, mut apply: F) {
        let slab = self.inner.lock().unwrap();
        for (_, rec) in slab.iter() {
            apply(rec);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a session with `pid` is currently registered.
    pub fn contains_pid(&self, pid: i32) -> bool {
        self.inner.lock().unwrap().iter().any(|(_, r)| r.pid() == pid)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
