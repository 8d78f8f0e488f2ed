//! Shutdown Coordinator — a process-wide cancellation token. Signal
//! handlers do only async-signal-safe work (set two atomic flags); a
//! watcher thread polls them and does the rest.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ShutdownReason {
    pub reason: String,
    pub signal_number: Option<i32>,
}

struct Inner {
    requested: Mutex<Option<ShutdownReason>>,
    condvar: Condvar,
}

/// Installed at process start; every long-lived loop polls
/// `is_shutdown_requested` or blocks on `wait_for_shutdown`.
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
    signal_pending: Arc<AtomicBool>,
    signal_number: Arc<AtomicI32>,
    watcher: Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: Mutex::new(None),
                condvar: Condvar::new(),
            }),
            signal_pending: Arc::new(AtomicBool::new(false)),
            signal_number: Arc::new(AtomicI32::new(0)),
            watcher: Mutex::new(None),
        }
    }

    /// Async-signal-safe: sets two atomic flags only. Call from an actual
    /// OS signal handler (wired by the binary crate via `signal_hook` or
    /// platform APIs); the coordinator itself does not install handlers,
    /// it only reacts to them.
    pub fn notify_signal(&self, signal_number: i32) {
        self.signal_number.store(signal_number, Ordering::SeqCst);
        self.signal_pending.store(true, Ordering::SeqCst);
    }

    /// Starts the 50ms watcher thread that turns a pending signal flag
    /// into a full shutdown.
    pub fn start_watcher(self: &Arc<Self>) {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let this = self.clone();
        let handle = thread::spawn(move || {
            while running_clone.load(Ordering::Relaxed) {
                thread::sleep(POLL_INTERVAL);
                if this.signal_pending.swap(false, Ordering::SeqCst) {
                    let number = this.signal_number.load(Ordering::SeqCst);
                    this.request_shutdown_with_signal(
                        format!("signal {number} received"),
                        Some(number),
                    );
                }
            }
        });
        *self.watcher.lock().unwrap() = Some((running, handle));
    }

    /// Programmatic shutdown, bypassing the signal path.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        self.request_shutdown_with_signal(reason.into(), None);
    }

    fn request_shutdown_with_signal(&self, reason: String, signal_number: Option<i32>) {
        let mut guard = self.inner.requested.lock().unwrap();
        if guard.is_none() {
            *guard = Some(ShutdownReason { reason, signal_number });
            self.inner.condvar.notify_all();
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.requested.lock().unwrap().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner.requested.lock().unwrap().clone()
    }

    /// Blocks until shutdown is requested.
    pub fn wait_for_shutdown(&self) {
        let guard = self.inner.requested.lock().unwrap();
        let _unused = self
            .inner
            .condvar
            .wait_while(guard, |r| r.is_none())
            .unwrap();
    }

    /// For tests: clears the shutdown flag and stops the watcher thread.
    pub fn reset(&self) {
        *self.inner.requested.lock().unwrap() = None;
        self.signal_pending.store(false, Ordering::SeqCst);
        if let Some((running, handle)) = self.watcher.lock().unwrap().take() {
            running.store(false, Ordering::Relaxed);
            let _ = handle.join();
        }
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        if let Some((running, handle)) = self.watcher.lock().unwrap().take() {
            running.store(false, Ordering::Relaxed);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn request_shutdown_is_idempotent_and_keeps_first_reason() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown("first");
        coordinator.request_shutdown("second");
        assert_eq!(coordinator.reason().unwrap().reason, "first");
    }

    #[test]
    fn wait_for_shutdown_unblocks_on_request() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let waiter = coordinator.clone();
        let handle = thread::spawn(move || {
            waiter.wait_for_shutdown();
        });
        thread::sleep(Duration::from_millis(20));
        coordinator.request_shutdown("test");
        let start = Instant::now();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn signal_flag_is_converted_to_shutdown_by_watcher() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.start_watcher();
        coordinator.notify_signal(15);
        thread::sleep(Duration::from_millis(150));
        assert!(coordinator.is_shutdown_requested());
        assert_eq!(coordinator.reason().unwrap().signal_number, Some(15));
        coordinator.reset();
    }

    #[test]
    fn reset_clears_state_for_reuse() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown("test");
        assert!(coordinator.is_shutdown_requested());
        coordinator.reset();
        assert!(!coordinator.is_shutdown_requested());
    }
}
