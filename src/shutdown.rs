//! One-way cancellation shared by the accept loop and every connection.
//!
//! A [`ShutdownController`] owns the signal and is the only side able to
//! fire it. Tasks receive a [`ShutdownToken`], which can observe and wait
//! for the signal but never set or reset it. Once fired, the signal stays
//! fired for the life of the controller.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owner of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    /// Create a controller in the running (not cancelled) state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Repeated calls are no-ops.
    pub fn cancel(&self) {
        let was_cancelled = self.tx.send_replace(true);
        if !was_cancelled {
            debug!("Shutdown requested");
        }
    }

    /// Observer handle for tasks.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            tx: Arc::clone(&self.tx),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Fire the signal once `trigger` completes.
    ///
    /// The returned handle can be aborted to stop listening without firing.
    pub fn cancel_on<F>(&self, trigger: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let controller = self.clone();
        tokio::spawn(async move {
            trigger.await;
            controller.cancel();
        })
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_cancel_is_sticky() {
        let controller = ShutdownController::new();
        let token = controller.token();
        assert!(!token.is_cancelled());

        controller.cancel();
        controller.cancel();
        assert!(token.is_cancelled());
        assert!(controller.is_cancelled());

        // Already fired: resolves without waiting
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let controller = ShutdownController::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let token = controller.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        tokio::task::yield_now().await;
        controller.cancel();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_token_outlives_controller() {
        let controller = ShutdownController::new();
        let token = controller.token();
        controller.cancel();
        drop(controller);

        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancel_on_trigger() {
        let controller = ShutdownController::new();
        let token = controller.token();
        let (tx, rx) = oneshot::channel::<()>();

        let listener = controller.cancel_on(async move {
            let _ = rx.await;
        });
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        listener.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_aborted_trigger_does_not_cancel() {
        let controller = ShutdownController::new();
        let listener = controller.cancel_on(std::future::pending());
        listener.abort();
        assert!(listener.await.unwrap_err().is_cancelled());
        assert!(!controller.is_cancelled());
    }
}
