//! Unix arena backing using mmap

use core::ptr::NonNull;

/// Mapping granularity; arena capacities round up to this
pub(super) const PAGE_SIZE: usize = 4096;

/// Map `size` bytes of zeroed anonymous memory
///
/// `size` must be page-aligned. Returns `None` when the kernel refuses.
pub(super) fn map(size: usize) -> Option<NonNull<u8>> {
    debug_assert_eq!(size % PAGE_SIZE, 0);

    let base = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        return None;
    }

    NonNull::new(base as *mut u8)
}

/// Release a mapping obtained from `map`
pub(super) fn unmap(base: NonNull<u8>, size: usize) {
    // A failed munmap at teardown is not recoverable; ignore the result.
    unsafe {
        libc::munmap(base.as_ptr() as *mut libc::c_void, size);
    }
}
