//! Events for worker sleep/wake
//!
//! A manual-reset event: `signal` sets it and wakes every waiter, `clear`
//! unsets it, `wait` returns immediately while it is set. The pool keeps
//! two: `work_available` (producers signal, deeply idle workers wait) and
//! `work_done` (the last active worker signals, the main thread waits).

use std::time::Duration;

/// Platform-specific manual-reset event
///
/// Waiters must re-check their predicate after `wait` returns regardless
/// of the result: a `clear` racing a `signal` can eat a wake, which the
/// short wait timeout bounds.
pub trait Event: Send + Sync {
    /// Set the event and wake all waiters
    fn signal(&self);

    /// Unset the event; later waiters block until the next signal
    fn clear(&self);

    /// Block until the event is set or the timeout elapses
    ///
    /// Returns `true` when the event was observed set.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Non-blocking check
    fn is_signaled(&self) -> bool;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexEvent as PlatformEvent;
    } else {
        mod fallback;
        pub use fallback::CondvarEvent as PlatformEvent;
    }
}

/// Create a new platform-appropriate event, cleared
pub fn new_event() -> PlatformEvent {
    PlatformEvent::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_signal_then_wait_returns_immediately() {
        let ev = new_event();
        ev.signal();
        assert!(ev.is_signaled());

        let start = Instant::now();
        assert!(ev.wait(Some(Duration::from_secs(1))));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_wait_timeout() {
        let ev = new_event();

        let start = Instant::now();
        let signaled = ev.wait(Some(Duration::from_millis(50)));
        assert!(!signaled);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_clear_blocks_again() {
        let ev = new_event();
        ev.signal();
        ev.clear();
        assert!(!ev.is_signaled());
        assert!(!ev.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn test_cross_thread_wake() {
        let ev = Arc::new(new_event());
        let ev2 = Arc::clone(&ev);

        let handle = thread::spawn(move || ev2.wait(Some(Duration::from_secs(10))));

        thread::sleep(Duration::from_millis(50));
        ev.signal();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_signal_wakes_all() {
        let ev = Arc::new(new_event());
        let mut handles = vec![];

        for _ in 0..4 {
            let ev = Arc::clone(&ev);
            handles.push(thread::spawn(move || ev.wait(Some(Duration::from_secs(10)))));
        }

        thread::sleep(Duration::from_millis(50));
        ev.signal();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
