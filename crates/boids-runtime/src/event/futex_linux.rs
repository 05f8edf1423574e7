//! Linux futex-based event
//!
//! One futex word holds the event state: 0 = clear, 1 = signaled.
//! Waiters sleep in FUTEX_WAIT while the word is 0; signal stores 1 and
//! wakes every waiter.

use super::Event;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const CLEAR: u32 = 0;
const SIGNALED: u32 = 1;

/// Futex-backed manual-reset event
pub struct FutexEvent {
    state: AtomicU32,
}

impl FutexEvent {
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(CLEAR),
        }
    }

    /// FUTEX_WAIT while the word reads CLEAR, up to `timeout`
    fn futex_wait(&self, timeout: Option<Duration>) {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Returns on wake, timeout, signal, or EAGAIN when the word is
        // no longer CLEAR; every case falls through to a state re-check.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.state.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                CLEAR,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn futex_wake_all(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.state.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Event for FutexEvent {
    fn signal(&self) {
        // Wake only on the clear -> signaled edge; waiters that race in
        // after the store see SIGNALED and never sleep.
        if self.state.swap(SIGNALED, Ordering::Release) == CLEAR {
            self.futex_wake_all();
        }
    }

    fn clear(&self) {
        self.state.store(CLEAR, Ordering::Release);
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.state.load(Ordering::Acquire) == SIGNALED {
                return true;
            }

            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return self.state.load(Ordering::Acquire) == SIGNALED;
                    }
                    Some(d - now)
                }
                None => None,
            };

            self.futex_wait(remaining);
        }
    }

    fn is_signaled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SIGNALED
    }
}

// Safety: FutexEvent only contains an atomic
unsafe impl Send for FutexEvent {}
unsafe impl Sync for FutexEvent {}
