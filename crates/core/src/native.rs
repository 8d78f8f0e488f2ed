//! Shared native-resource discipline for the fingerprint and transcode
//! engines: a single process-wide mutex serializing calls into whichever
//! native decode library is active, plus a retry-with-backoff helper for
//! the handful of fallible entry points (`open`, `find_stream_info`).

use crate::error::{DedupError, Result};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Held for the duration of a single file's native decode call. `ffmpeg`
/// and raw-decode bindings are not reentrant across threads; this lock
/// makes that explicit rather than relying on each crate's internal
/// locking.
pub static NATIVE_DECODE_LOCK: Mutex<()> = Mutex::new(());

/// Retries `open`/`find_stream_info`-style entry points with 100, 200,
/// 400 ms backoff, bounded by `max_attempts`.
pub fn retry_native<T>(max_attempts: u32, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay_ms = 100u64;
    let mut last_err = None;
    for attempt_number in 0..max_attempts.max(1) {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                if attempt_number + 1 < max_attempts {
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| DedupError::DecodeFailed("native retry exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn retry_native_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_native(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DedupError::DecodeFailed("always fails".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_native_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_native(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(DedupError::DecodeFailed("not yet".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
    }
}
