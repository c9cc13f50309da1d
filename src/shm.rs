// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// POSIX shared memory handle for the admission ring.
//
// Ownership model: the region belongs to exactly one server lifetime. The
// server creates it with exclusive-create and unlinks it on clean shutdown;
// clients only map and unmap. There is no reference counting — a second
// server hitting the same name is a configuration error, not a share.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::error::{Error, Result};

/// A named, mapped POSIX shared memory region.
pub struct ShmHandle {
    mem: *mut u8,
    size: usize,
    name: String,
}

// The mapped region is process-shared by design; all concurrent access goes
// through the semaphores living inside it.
unsafe impl Send for ShmHandle {}
unsafe impl Sync for ShmHandle {}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name.as_bytes())
        .map_err(|_| Error::InvalidArgument(format!("shm name contains NUL: {name:?}")))
}

impl ShmHandle {
    /// Create the region exclusively, sized to `size` bytes, owner read/write
    /// only. Fails with [`Error::AlreadyInUse`] when the name is taken.
    pub fn create_exclusive(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("shm size is 0".into()));
        }
        let cname = c_name(name)?;
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
            )
        };
        if fd == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Err(Error::AlreadyInUse);
            }
            return Err(Error::SharedMemory(err));
        }
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(Error::SharedMemory(err));
        }
        Self::map(fd, size, name.to_string())
    }

    /// Map an existing region. `size` may be smaller than the backing object;
    /// the ring uses this to map the header alone before it knows the
    /// capacity.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("shm size is 0".into()));
        }
        let cname = c_name(name)?;
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_RDWR,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(Error::SharedMemory(io::Error::last_os_error()));
        }
        Self::map(fd, size, name.to_string())
    }

    fn map(fd: i32, size: usize, name: String) -> Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(Error::SharedMemory(io::Error::last_os_error()));
        }
        Ok(Self {
            mem: mem as *mut u8,
            size,
            name,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// POSIX name used to open the region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the backing object. Idempotent: a name that is already gone is
    /// not an error.
    pub fn unlink(&self) -> Result<()> {
        Self::unlink_by_name(&self.name)
    }

    /// Remove a named region without holding a handle on it.
    pub fn unlink_by_name(name: &str) -> Result<()> {
        let cname = c_name(name)?;
        if unsafe { libc::shm_unlink(cname.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(Error::SharedMemory(err));
            }
        }
        Ok(())
    }
}

impl Drop for ShmHandle {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}
