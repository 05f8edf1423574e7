//! Fallback event using std::sync::Condvar
//!
//! Used on platforms without futex support. Less efficient but portable.

use super::Event;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Condvar-based manual-reset event (fallback)
pub struct CondvarEvent {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl CondvarEvent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }
}

impl Default for CondvarEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Event for CondvarEvent {
    fn signal(&self) {
        {
            let mut signaled = self.state.lock().unwrap();
            *signaled = true;
        }
        self.condvar.notify_all();
    }

    fn clear(&self) {
        let mut signaled = self.state.lock().unwrap();
        *signaled = false;
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signaled = self.state.lock().unwrap();

        while !*signaled {
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return *signaled;
                    }
                    let (g, _) = self.condvar.wait_timeout(signaled, d - now).unwrap();
                    signaled = g;
                }
                None => {
                    signaled = self.condvar.wait(signaled).unwrap();
                }
            }
        }

        true
    }

    fn is_signaled(&self) -> bool {
        *self.state.lock().unwrap()
    }
}
