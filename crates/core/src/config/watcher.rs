//! Config file watcher: polls the watched path's mtime every N seconds
//! and reloads + publishes a single change event on change.
//!
//! Deliberately a plain polling loop, not `notify`/inotify; see
//! DESIGN.md for why that dependency was dropped rather than reused here.

use crate::config::ConfigStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

pub struct ConfigWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Spawn the poll loop. `poll_interval` is typically 2s by default.
    pub fn start(store: Arc<ConfigStore>, path: PathBuf, poll_interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = thread::spawn(move || {
            let mut last_modified = file_mtime(&path);
            while running_clone.load(Ordering::Relaxed) {
                thread::sleep(poll_interval);
                if !running_clone.load(Ordering::Relaxed) {
                    break;
                }
                let current = file_mtime(&path);
                if current != last_modified {
                    last_modified = current;
                    match store.load(&path) {
                        Ok(()) => {
                            store.bus().publish(
                                vec!["configuration".to_string()],
                                "file_observer",
                            );
                        }
                        Err(e) => {
                            tracing::warn!("config_watcher: failed to reload {}: {e}", path.display());
                        }
                    }
                }
            }
        });

        Self { running, handle: Some(handle) }
    }

    /// Stoppable and idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn file_mtime(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    #[test]
    fn watcher_publishes_once_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"processing_batch_size": 50}"#).unwrap();

        let store = Arc::new(ConfigStore::load_or_default(&[path.clone()]).unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        store.bus().subscribe(Box::new(move |event| {
            if event.source == "file_observer" {
                count2.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }));

        let mut watcher = ConfigWatcher::start(store.clone(), path.clone(), Duration::from_millis(20));

        // Ensure the mtime actually advances on filesystems with coarse
        // resolution before rewriting.
        sleep(Duration::from_millis(50));
        std::fs::write(&path, r#"{"processing_batch_size": 200}"#).unwrap();
        sleep(Duration::from_millis(200));

        watcher.stop();
        assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(store.get_i64("processing_batch_size"), Some(200));
    }
}
