//! Periodic background workers
//!
//! Every background activity of the robot (ramp, odometry, obstacle scan,
//! battery sampling, watchdog check) is a [`PeriodicWorker`]: one named thread
//! that runs a tick closure at a fixed period until it is stopped.
//!
//! - Ticks are scheduled against absolute deadlines, so a slow tick does not
//!   shift the following ones.
//! - The thread waits on a stop channel instead of sleeping, so `stop()`
//!   returns within one tick rather than one period.
//! - A panicking tick is logged and the loop keeps running.

use crate::DriverError;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, trace};

/// Join a thread with an upper bound on the wait.
pub trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        let (tx, rx) = bounded(1);

        // The joiner outlives us on timeout; the OS reclaims it at exit.
        thread::spawn(move || {
            let _ = tx.send(self.join().map(|_| ()));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Scheduling options of a worker thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerOptions {
    /// Raise the thread to maximum priority (`realtime` feature only).
    pub high_priority: bool,
}

/// A named thread running a closure at a fixed period.
pub struct PeriodicWorker {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    /// How long `stop()` waits for the thread to finish its current tick.
    const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn spawn<F>(name: &str, period: Duration, tick: F) -> Result<Self, DriverError>
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_with(name, period, WorkerOptions::default(), tick)
    }

    pub fn spawn_with<F>(
        name: &str,
        period: Duration,
        options: WorkerOptions,
        mut tick: F,
    ) -> Result<Self, DriverError>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker_name = name.to_string();

        let handle = thread::Builder::new().name(format!("siana-{}", name)).spawn(move || {
            if options.high_priority {
                set_high_priority(&worker_name);
            }
            info!("{} worker started (period {:?})", worker_name, period);

            let mut deadline = Instant::now() + period;
            loop {
                match stop_rx.recv_deadline(deadline) {
                    Err(RecvTimeoutError::Timeout) => {},
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&mut tick)) {
                    error!(
                        "{} worker tick panicked: {}",
                        worker_name,
                        panic_message(payload.as_ref())
                    );
                }

                deadline += period;
                let now = Instant::now();
                if deadline < now {
                    trace!("{} worker overran its period", worker_name);
                    deadline = now + period;
                }
            }

            info!("{} worker stopped", worker_name);
        })?;

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and join the thread. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join_timeout(Self::JOIN_TIMEOUT)
        {
            error!(
                "{} worker failed to shut down within {:?}: {}",
                self.name,
                Self::JOIN_TIMEOUT,
                panic_message(e.as_ref())
            );
        }
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PeriodicWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicWorker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(feature = "realtime")]
fn set_high_priority(name: &str) {
    use thread_priority::*;
    use tracing::warn;

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => info!("{} thread priority set to MAX (realtime)", name),
        Err(e) => warn!(
            "Failed to set {} thread priority: {:?}. \
            On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
            name, e
        ),
    }
}

#[cfg(not(feature = "realtime"))]
fn set_high_priority(name: &str) {
    trace!("{} requested high priority without the realtime feature", name);
}
