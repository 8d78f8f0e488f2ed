//! Database Access Queue — sole owner of the embedded SQL connection. A
//! single worker thread drains a FIFO of write and read closures so the
//! connection is touched from exactly one thread.

pub mod schema;

use crate::error::{DedupError, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Result of a write closure.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub success: bool,
    pub message: String,
}

impl WriteOutcome {
    pub fn ok() -> Self {
        Self { success: true, message: String::new() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

type BoxedWrite = Box<dyn FnOnce(&Connection) -> Result<WriteOutcome> + Send + 'static>;
type BoxedRead = Box<dyn FnOnce(&Connection) + Send + 'static>;

enum Job {
    Write { id: u64, op: BoxedWrite },
    Read(BoxedRead),
}

/// One-shot handle for the result of an `enqueue_read` operation.
pub struct ReadHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> ReadHandle<T> {
    /// Blocks until the worker thread fulfils the read.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .map_err(|_| DedupError::DbFatal("read operation dropped before completion".into()))?
    }
}

/// The sole owner of the DB connection.
pub struct DbQueue {
    sender: Mutex<Option<Sender<Job>>>,
    next_operation_id: AtomicU64,
    pending: Arc<(Mutex<usize>, Condvar)>,
    results: Arc<Mutex<HashMap<u64, WriteOutcome>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl DbQueue {
    /// Opens `path`, applies the pragmas and schema, and starts the single
    /// worker thread. Open/corrupt-store failures surface as `DbFatal`.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let conn = schema::open_and_initialize(path)
            .map_err(|e| DedupError::DbFatal(e.to_string()))?;

        let (sender, receiver) = mpsc::channel::<Job>();
        let pending = Arc::new((Mutex::new(0usize), Condvar::new()));
        let results = Arc::new(Mutex::new(HashMap::new()));
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let worker_pending = pending.clone();
        let worker_results = results.clone();
        let handle = thread::Builder::new()
            .name("db-access-queue".into())
            .spawn(move || worker_loop(conn, receiver, worker_pending, worker_results))
            .expect("failed to spawn db-access-queue thread");

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            next_operation_id: AtomicU64::new(1),
            pending,
            results,
            worker: Mutex::new(Some(handle)),
            stopped,
        }))
    }

    /// Appends a write closure; returns its operation ID immediately.
    /// IDs are assigned here, under no additional lock beyond the atomic
    /// counter, so they are monotonically increasing per caller.
    pub fn enqueue_write<F>(&self, op: F) -> u64
    where
        F: FnOnce(&Connection) -> Result<WriteOutcome> + Send + 'static,
    {
        let id = self.next_operation_id.fetch_add(1, Ordering::SeqCst);
        self.bump_pending(1);
        let boxed: BoxedWrite = Box::new(op);
        let sent = self
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.send(Job::Write { id, op: boxed }).is_ok())
            .unwrap_or(false);
        if !sent {
            self.bump_pending(-1);
        }
        id
    }

    /// Appends a read closure; the return value is delivered through the
    /// returned `ReadHandle` once the worker executes it.
    pub fn enqueue_read<T, F>(&self, op: F) -> ReadHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<T>>();
        self.bump_pending(1);
        let pending = self.pending.clone();
        let boxed: BoxedRead = Box::new(move |conn| {
            let result = op(conn);
            let _ = tx.send(result);
            let (lock, cvar) = &*pending;
            let mut count = lock.lock().unwrap();
            *count -= 1;
            if *count == 0 {
                cvar.notify_all();
            }
        });
        let sent = self
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.send(Job::Read(boxed)).is_ok())
            .unwrap_or(false);
        if !sent {
            self.bump_pending(-1);
        }
        ReadHandle { receiver: rx }
    }

    /// Blocks until every previously enqueued operation has drained.
    pub fn wait_for_completion(&self) {
        let (lock, cvar) = &*self.pending;
        let mut count = lock.lock().unwrap();
        while *count > 0 {
            count = cvar.wait(count).unwrap();
        }
    }

    /// Signals the worker to exit after draining; idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wait_for_completion();
        // Dropping the sender closes the channel; the worker's
        // `receiver.iter()` then ends and the thread returns.
        self.sender.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn operation_result(&self, operation_id: u64) -> Option<WriteOutcome> {
        self.results.lock().unwrap().get(&operation_id).cloned()
    }

    pub fn next_operation_id(&self) -> u64 {
        self.next_operation_id.load(Ordering::SeqCst)
    }

    fn bump_pending(&self, delta: isize) {
        let (lock, cvar) = &*self.pending;
        let mut count = lock.lock().unwrap();
        if delta >= 0 {
            *count += delta as usize;
        } else {
            *count = count.saturating_sub((-delta) as usize);
        }
        if *count == 0 {
            cvar.notify_all();
        }
    }
}

impl Drop for DbQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    conn: Connection,
    receiver: Receiver<Job>,
    pending: Arc<(Mutex<usize>, Condvar)>,
    results: Arc<Mutex<HashMap<u64, WriteOutcome>>>,
) {
    for job in receiver.iter() {
        match job {
            Job::Write { id, op } => {
                let outcome = match op(&conn) {
                    Ok(outcome) => outcome,
                    Err(e) => WriteOutcome::failure(e.to_string()),
                };
                results.lock().unwrap().insert(id, outcome);
                let (lock, cvar) = &*pending;
                let mut count = lock.lock().unwrap();
                *count = count.saturating_sub(1);
                if *count == 0 {
                    cvar.notify_all();
                }
            }
            Job::Read(op) => {
                // `op` decrements `pending` and notifies internally once
                // the result is sent, after it runs against `conn`.
                op(&conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_applied_in_enqueue_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DbQueue::open(&dir.path().join("db.sqlite3")).unwrap();

        for i in 0..5 {
            queue.enqueue_write(move |conn| {
                conn.execute(
                    "INSERT INTO scanned_files (file_path, file_name, created_at) VALUES (?1, ?2, 0)",
                    rusqlite::params![format!("/f{i}"), format!("f{i}")],
                )?;
                Ok(WriteOutcome::ok())
            });
        }
        queue.wait_for_completion();

        let names: Vec<String> = queue
            .enqueue_read(|conn| {
                let mut stmt = conn.prepare("SELECT file_name FROM scanned_files ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .wait()
            .unwrap();

        assert_eq!(names, vec!["f0", "f1", "f2", "f3", "f4"]);
    }

    #[test]
    fn read_sees_effect_of_prior_write_from_same_thread() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DbQueue::open(&dir.path().join("db.sqlite3")).unwrap();

        queue.enqueue_write(|conn| {
            conn.execute(
                "INSERT INTO scanned_files (file_path, file_name, created_at) VALUES ('/a', 'a', 0)",
                [],
            )?;
            Ok(WriteOutcome::ok())
        });

        let count: i64 = queue
            .enqueue_read(|conn| Ok(conn.query_row("SELECT count(*) FROM scanned_files", [], |r| r.get(0))?))
            .wait()
            .unwrap();

        assert_eq!(count, 1);
    }

    #[test]
    fn operation_id_is_retrievable_and_failure_is_captured_not_thrown() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DbQueue::open(&dir.path().join("db.sqlite3")).unwrap();

        let id = queue.enqueue_write(|conn| {
            // Duplicate unique file_path triggers a constraint failure,
            // surfaced as a `fail` result, never a panic.
            conn.execute(
                "INSERT INTO scanned_files (file_path, file_name, created_at) VALUES ('/x', 'x', 0)",
                [],
            )?;
            conn.execute(
                "INSERT INTO scanned_files (file_path, file_name, created_at) VALUES ('/x', 'x', 0)",
                [],
            )?;
            Ok(WriteOutcome::ok())
        });
        queue.wait_for_completion();

        let outcome = queue.operation_result(id).unwrap();
        assert!(!outcome.success);
    }
}
