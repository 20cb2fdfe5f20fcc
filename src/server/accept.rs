//! Accept loop.
//!
//! Hands every accepted connection to its own echo task and goes straight
//! back to accepting. There is no connection limit.

use super::echo::handle_connection;
use super::registry::ConnectionRegistry;
use super::socket::is_listener_closed;
use crate::config::WriteErrorPolicy;
use crate::shutdown::ShutdownToken;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Pause after an unexpected accept error, so a broken listener does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Source of incoming connections.
pub trait Accept: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

impl Accept for UnixListener {
    type Stream = UnixStream;

    fn accept(&self) -> impl Future<Output = io::Result<UnixStream>> + Send {
        async move {
            let (stream, _addr) = UnixListener::accept(self).await?;
            Ok(stream)
        }
    }
}

/// Accept connections until shutdown or until the listener is closed.
pub async fn accept_loop<L: Accept>(
    listener: Arc<L>,
    registry: Arc<ConnectionRegistry>,
    shutdown: ShutdownToken,
    on_write_error: WriteErrorPolicy,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                let token = shutdown.clone();
                let conn_id = registry.spawn(move |conn_id| async move {
                    let reason = handle_connection(stream, conn_id, token, on_write_error).await;
                    debug!(conn_id, ?reason, "Connection handler finished");
                });
                info!(conn_id, live = registry.len(), "Accepted connection");
            }
            Err(e) if is_listener_closed(&e) => {
                debug!(error = %e, "Listener closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    debug!("Accept loop stopped");
}
