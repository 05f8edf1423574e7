//! Bump arena scratch memory
//!
//! Fixed-capacity linear allocators backed by anonymous mappings. Every
//! allocation is rounded up to the cache line, reset is a single store,
//! and nothing is ever freed individually. Arenas are single-owner: each
//! worker has one, the main thread has one, the spatial hash and the step
//! scheduler each have one.

use boids_core::constants::CACHE_LINE_SIZE;
use boids_core::error::ArenaError;
use core::cell::Cell;
use core::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as platform;
    } else {
        compile_error!("Unsupported platform");
    }
}

/// Fixed-capacity bump allocator
///
/// Allocation hands out cache-line-aligned ranges from a monotone offset;
/// `reset` invalidates everything at once. The backing mapping is released
/// on drop.
#[derive(Debug)]
pub struct BumpArena {
    base: NonNull<u8>,
    size: usize,
    offset: Cell<usize>,
}

// Safety: the arena can move between threads; it is not Sync, so all
// allocation goes through its single owner.
unsafe impl Send for BumpArena {}

impl BumpArena {
    /// Map a new arena of at least `bytes` capacity
    ///
    /// Fails on a zero-byte request or when the mapping cannot be obtained.
    pub fn new(bytes: usize) -> Result<Self, ArenaError> {
        if bytes == 0 {
            return Err(ArenaError::ZeroSize);
        }

        let size = round_up(bytes, platform::PAGE_SIZE);
        let base = platform::map(size).ok_or(ArenaError::MapFailed)?;

        Ok(Self {
            base,
            size,
            offset: Cell::new(0),
        })
    }

    /// Reserve `n` bytes, rounded up to the cache line
    ///
    /// Returns `None` when `n` is zero or the remaining capacity is
    /// insufficient. The returned pointer is 64-byte aligned and valid
    /// until the next `reset`.
    pub fn alloc_bytes(&self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }

        let rounded = round_up(n, CACHE_LINE_SIZE);
        let start = self.offset.get();
        let end = start.checked_add(rounded)?;
        if end > self.size {
            return None;
        }

        self.offset.set(end);
        // Safety: start < size, and base..base+size is our mapping
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }

    /// Reserve a zero-initialised slice of `len` values of `T`
    ///
    /// The returned borrow is disjoint from every other allocation, so
    /// handing out `&mut` through `&self` is sound. `T` must not need
    /// alignment beyond the cache line.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Copy>(&self, len: usize) -> Option<&mut [T]> {
        debug_assert!(core::mem::align_of::<T>() <= CACHE_LINE_SIZE);

        if len == 0 {
            return None;
        }
        let bytes = len.checked_mul(core::mem::size_of::<T>())?;
        let ptr = self.alloc_bytes(bytes)?.as_ptr() as *mut T;

        // Safety: the range was just reserved for us and is cache-line
        // aligned; zeroing makes any Copy bit pattern valid enough for
        // the numeric/index types stored in arenas.
        unsafe {
            core::ptr::write_bytes(ptr as *mut u8, 0, bytes);
            Some(core::slice::from_raw_parts_mut(ptr, len))
        }
    }

    /// Invalidate all prior allocations. O(1).
    #[inline]
    pub fn reset(&self) {
        self.offset.set(0);
    }

    /// Bytes currently handed out (including rounding)
    #[inline]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Total mapped capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        platform::unmap(self.base, self.size);
    }
}

#[inline]
const fn round_up(n: usize, to: usize) -> usize {
    (n + to - 1) & !(to - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(BumpArena::new(0).unwrap_err(), ArenaError::ZeroSize);
    }

    #[test]
    fn test_alloc_alignment_and_rounding() {
        let arena = BumpArena::new(4096).unwrap();

        let a = arena.alloc_bytes(1).unwrap();
        assert_eq!(a.as_ptr() as usize % CACHE_LINE_SIZE, 0);
        assert_eq!(arena.used(), CACHE_LINE_SIZE);

        let b = arena.alloc_bytes(65).unwrap();
        assert_eq!(b.as_ptr() as usize % CACHE_LINE_SIZE, 0);
        assert_eq!(arena.used(), 3 * CACHE_LINE_SIZE);
    }

    #[test]
    fn test_zero_byte_alloc_rejected() {
        let arena = BumpArena::new(4096).unwrap();
        assert!(arena.alloc_bytes(0).is_none());
        assert!(arena.alloc_slice::<u32>(0).is_none());
    }

    #[test]
    fn test_exhaustion() {
        let arena = BumpArena::new(128).unwrap();
        let cap = arena.capacity();

        assert!(arena.alloc_bytes(cap).is_some());
        assert!(arena.alloc_bytes(1).is_none());
    }

    #[test]
    fn test_reset_reuses_memory() {
        let arena = BumpArena::new(4096).unwrap();

        let first = arena.alloc_bytes(100).unwrap().as_ptr() as usize;
        assert!(arena.alloc_bytes(100).is_some());

        arena.reset();
        assert_eq!(arena.used(), 0);

        let again = arena.alloc_bytes(100).unwrap().as_ptr() as usize;
        assert_eq!(first, again);
    }

    #[test]
    fn test_alloc_slice_zeroed() {
        let arena = BumpArena::new(4096).unwrap();

        let s = arena.alloc_slice::<u32>(32).unwrap();
        assert_eq!(s.len(), 32);
        assert!(s.iter().all(|&v| v == 0));

        s[0] = 7;
        arena.reset();

        let s2 = arena.alloc_slice::<u32>(32).unwrap();
        assert_eq!(s2[0], 0); // re-zeroed after reset
    }
}
