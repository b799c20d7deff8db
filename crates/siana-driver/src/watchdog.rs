//! Watchdog clock - liveness of the operator link
//!
//! Stores the time of the last accepted command or keepalive as monotonic
//! microseconds since process start, so it lives in an `AtomicU64` and is
//! unaffected by wall-clock adjustments (NTP, manual changes).

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

fn monotonic_micros() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Time of the last heartbeat, compared against a fixed timeout.
#[derive(Debug)]
pub struct WatchdogClock {
    last_heartbeat: AtomicU64,
    timeout: Duration,
}

impl WatchdogClock {
    /// A fresh clock counts as fed.
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_heartbeat: AtomicU64::new(monotonic_micros()),
            timeout,
        }
    }

    /// Reset the clock.
    pub fn feed(&self) {
        self.last_heartbeat.store(monotonic_micros(), Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        let last_us = self.last_heartbeat.load(Ordering::Relaxed);
        Duration::from_micros(monotonic_micros().saturating_sub(last_us))
    }

    /// True while the last heartbeat is younger than the timeout.
    pub fn is_alive(&self) -> bool {
        self.elapsed() < self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
