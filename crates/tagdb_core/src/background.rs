//! Periodic maintenance thread: async-mode fsync and auto-vacuum.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// A thread that runs `task` every `period` until stopped.
///
/// Stopping wakes the thread immediately and joins it; the task is not run
/// again after [`stop`](Self::stop) returns.
pub(crate) struct BackgroundWorker {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns the worker thread.
    pub(crate) fn spawn<F>(name: &str, period: Duration, mut task: F) -> CoreResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let shared = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                debug!(period_ms = period.as_millis() as u64, "background worker started");
                let mut stopped = shared.stopped.lock();
                loop {
                    if *stopped {
                        break;
                    }
                    let timed_out = shared.wake.wait_for(&mut stopped, period).timed_out();
                    if *stopped {
                        break;
                    }
                    if timed_out {
                        // The task runs without the signal lock.
                        drop(stopped);
                        task();
                        stopped = shared.stopped.lock();
                    }
                }
                debug!("background worker stopped");
            })
            .map_err(|err| CoreError::invalid_operation(format!("cannot spawn {name}: {err}")))?;
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("background worker panicked");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn runs_periodically_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = BackgroundWorker::spawn("tick", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn stop_does_not_wait_for_the_period() {
        let mut worker =
            BackgroundWorker::spawn("idle", Duration::from_secs(3600), || {}).unwrap();
        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
