//! Registry of live connection tasks.
//!
//! Each accepted connection runs as its own task. The registry keeps the
//! task handles keyed by connection id so shutdown can wait for them to
//! finish and abort whatever is still running after the drain timeout.

use slab::Slab;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of draining the registry at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Connections that finished within the drain timeout.
    pub drained: usize,
    /// Connections aborted after the timeout.
    pub aborted: usize,
}

/// Live connection tasks, shared between the accept loop and the tasks.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    tasks: Mutex<Slab<JoinHandle<()>>>,
    accepted: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn a connection task and track it until it returns.
    ///
    /// `make_task` receives the connection id. The task removes its own
    /// entry on completion.
    pub fn spawn<F, Fut>(self: &Arc<Self>, make_task: F) -> usize
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.accepted.fetch_add(1, Ordering::Relaxed);

        // Hold the lock across spawn so the task cannot remove itself
        // before its handle is stored.
        let mut tasks = self.lock();
        let entry = tasks.vacant_entry();
        let conn_id = entry.key();
        let task = make_task(conn_id);
        let registry = Arc::clone(self);
        entry.insert(tokio::spawn(async move {
            task.await;
            registry.remove(conn_id);
        }));
        conn_id
    }

    fn remove(&self, conn_id: usize) {
        if self.lock().try_remove(conn_id).is_some() {
            debug!(conn_id, "Connection closed");
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total connections accepted since start.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for every live task, then abort the rest.
    ///
    /// Tasks spawned after this call starts are not covered.
    pub async fn drain(&self, timeout: Duration) -> DrainStats {
        let mut handles: Vec<JoinHandle<()>> = self.lock().drain().collect();
        if handles.is_empty() {
            return DrainStats::default();
        }

        let wait_all = async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, wait_all).await.is_ok() {
            return DrainStats {
                drained: handles.len(),
                aborted: 0,
            };
        }

        let mut stats = DrainStats::default();
        for handle in &handles {
            if handle.is_finished() {
                stats.drained += 1;
            } else {
                handle.abort();
                stats.aborted += 1;
            }
        }
        stats
    }

    fn lock(&self) -> MutexGuard<'_, Slab<JoinHandle<()>>> {
        // A panic while holding the lock leaves the slab itself consistent.
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
