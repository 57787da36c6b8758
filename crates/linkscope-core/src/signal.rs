//! Cooperative stop signal shared between a controller and its producer.
//!
//! Producers check [`StopSignal::is_set`] between chunks and use
//! [`StopSignal::wait_timeout`] as their poll ticker, so a stop request wakes a
//! sleeping producer immediately instead of after the next interval.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut stopped = match self.stopped.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *stopped = true;
        self.cv.notify_all();
    }

    pub fn is_set(&self) -> bool {
        match self.stopped.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep up to `timeout`, waking early on stop. Returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = match self.stopped.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*stopped {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            stopped = match self.cv.wait_timeout(stopped, remaining) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *stopped
    }
}
