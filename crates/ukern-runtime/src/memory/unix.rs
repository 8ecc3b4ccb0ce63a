//! mmap-backed stack mappings

use std::io;
use std::ptr::{self, NonNull};
use ukern_core::kwarn;

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int =
    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_STACK;
#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

pub(super) fn page_size() -> usize {
    // Safety: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Map `len` read/write bytes and revoke access to the lowest `guard`
pub(super) fn map_stack(len: usize, guard: usize) -> io::Result<NonNull<u8>> {
    // Safety: anonymous mapping at a kernel-chosen address
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            MAP_FLAGS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // Safety: the guard range is the start of the mapping we just made
    if unsafe { libc::mprotect(base, guard, libc::PROT_NONE) } != 0 {
        let err = io::Error::last_os_error();
        // Safety: unmapping what we mapped
        unsafe { libc::munmap(base, len) };
        return Err(err);
    }

    NonNull::new(base.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

pub(super) fn unmap_stack(base: NonNull<u8>, len: usize) {
    // Safety: `base..base+len` is a mapping owned by the dropped stack
    if unsafe { libc::munmap(base.as_ptr().cast(), len) } != 0 {
        kwarn!("munmap of fiber stack failed: {}", io::Error::last_os_error());
    }
}
