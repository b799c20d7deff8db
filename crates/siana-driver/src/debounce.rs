//! Lock-free edge debouncer for interrupt context

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Accepts at most one edge per window.
///
/// `accept` is a single compare-exchange and never blocks, so it is safe to
/// call from an edge handler.
#[derive(Debug)]
pub struct Debouncer {
    /// Micros since anchor of the last accepted edge, +1 so 0 means "none yet"
    last_accepted: AtomicU64,
    window_us: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            last_accepted: AtomicU64::new(0),
            window_us: window.as_micros() as u64,
        }
    }

    /// True if this edge is outside the window of the previous accepted edge.
    pub fn accept(&self) -> bool {
        let now = ANCHOR.get_or_init(Instant::now).elapsed().as_micros() as u64 + 1;
        let last = self.last_accepted.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < self.window_us {
            return false;
        }
        self.last_accepted
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
