//! Named, ordered spawn/stop of cooperative worker threads.
//!
//! Each worker cooperatively polls a [`tokio_util::sync::CancellationToken`]
//! at its suspension points and is expected to return promptly once
//! cancelled. [`WorkerPool::stop_all`] joins workers in ascending
//! `stop_order`, giving callers control over teardown sequencing (e.g. stop
//! the audio sender before the transport it writes to).

use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{record_context, CoreError, CoreResult};
use crate::lifecycle_cell::LifecycleCell;
use crate::protocol_constants::THREAD_JOIN_TIMEOUT_SECS;

struct Worker {
    name: String,
    stop_order: i32,
    handle: Option<JoinHandle<()>>,
}

/// A named, ordered collection of cooperative worker threads sharing one
/// cancellation token.
pub struct WorkerPool {
    lifecycle: LifecycleCell,
    cancel: CancellationToken,
    workers: parking_lot::Mutex<Vec<Worker>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    #[must_use]
    pub fn new() -> Self {
        let lifecycle = LifecycleCell::new();
        if lifecycle.init_once() {
            lifecycle.init_commit();
        }
        Self {
            lifecycle,
            cancel: CancellationToken::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The cancellation token every spawned closure should poll.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns `func` as a named OS thread, recorded under `stop_order` for
    /// ordered shutdown. Fails if the pool has already been torn down, or
    /// if the OS refuses to create the thread.
    pub fn spawn<F>(&self, name: &str, stop_order: i32, func: F) -> CoreResult<()>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        if self.lifecycle.is_dead() {
            return Err(record_context(CoreError::Usage(format!(
                "cannot spawn worker {name}: pool is dead"
            ))));
        }

        let cancel = self.cancel.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || func(cancel))
            .map_err(|e| record_context(CoreError::Platform(format!("spawn {name}: {e}"))))?;

        self.workers.lock().push(Worker {
            name: name.to_string(),
            stop_order,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Signals cancellation, then joins every worker in ascending
    /// `stop_order`. A worker that exceeds [`THREAD_JOIN_TIMEOUT_SECS`] is
    /// logged and its resources are deliberately leaked rather than
    /// blocking shutdown indefinitely.
    pub fn stop_all(&self) {
        self.cancel.cancel();

        let mut workers = self.workers.lock();
        workers.sort_by_key(|w| w.stop_order);

        for worker in workers.iter_mut() {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            let name = worker.name.clone();
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = std::thread::spawn(move || {
                let result = handle.join();
                let _ = tx.send(result);
            });
            match rx.recv_timeout(Duration::from_secs(THREAD_JOIN_TIMEOUT_SECS)) {
                Ok(Ok(())) => {
                    log::debug!("worker {name} stopped");
                    let _ = joiner.join();
                }
                Ok(Err(_)) => {
                    log::warn!("worker {name} panicked during shutdown");
                    let _ = joiner.join();
                }
                Err(_) => {
                    // `joiner` is itself blocked inside `handle.join()` on
                    // the unresponsive worker thread; joining it here would
                    // hang just as long. Leak it instead.
                    log::warn!(
                        "worker {name} did not join within {THREAD_JOIN_TIMEOUT_SECS}s; leaking"
                    );
                    std::mem::forget(joiner);
                }
            }
        }
    }

    /// Tears the pool down permanently; `spawn` fails after this.
    pub fn destroy(&self) {
        self.stop_all();
        self.lifecycle.shutdown_forever();
    }
}
