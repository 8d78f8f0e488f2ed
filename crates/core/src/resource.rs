//! Resource monitor: atomic byte/allocation counters for native buffer
//! acquisition in the fingerprint and transcode paths, logged periodically.
//! Pure observability — nothing here feeds back into control flow.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Default)]
pub struct ResourceStats {
    current_bytes: AtomicI64,
    peak_bytes: AtomicI64,
    allocations: AtomicU64,
    deallocations: AtomicU64,
}

impl ResourceStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record acquisition of a native buffer of `bytes` size.
    pub fn record_alloc(&self, bytes: i64) {
        let current = self.current_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.peak_bytes.fetch_max(current, Ordering::Relaxed);
    }

    /// Record release of a native buffer of `bytes` size.
    pub fn record_dealloc(&self, bytes: i64) {
        self.current_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            current_bytes: self.current_bytes.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub current_bytes: i64,
    pub peak_bytes: i64,
    pub allocations: u64,
    pub deallocations: u64,
}

/// Spawns a thread that logs `stats` at `info!` every `interval` until
/// `running` is cleared. The caller is responsible for stopping the
/// returned handle's backing flag and joining.
pub fn spawn_logger(
    stats: Arc<ResourceStats>,
    running: Arc<std::sync::atomic::AtomicBool>,
    interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
            thread::sleep(interval);
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let snap = stats.snapshot();
            tracing::info!(
                current_bytes = snap.current_bytes,
                peak_bytes = snap.peak_bytes,
                allocations = snap.allocations,
                deallocations = snap.deallocations,
                "resource monitor"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_the_high_water_mark_across_dealloc() {
        let stats = ResourceStats::new();
        stats.record_alloc(100);
        stats.record_alloc(50);
        stats.record_dealloc(100);
        let snap = stats.snapshot();
        assert_eq!(snap.current_bytes, 50);
        assert_eq!(snap.peak_bytes, 150);
        assert_eq!(snap.allocations, 2);
        assert_eq!(snap.deallocations, 1);
    }
}
