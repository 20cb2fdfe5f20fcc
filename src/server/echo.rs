//! Echo handler.
//!
//! Reads up to [`BUFFER_SIZE`] bytes at a time and writes back exactly the
//! bytes read, in one write call. There is no framing: chunk boundaries are
//! whatever the read returns.

use crate::config::WriteErrorPolicy;
use crate::shutdown::ShutdownToken;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Largest chunk read (and echoed) per iteration.
pub const BUFFER_SIZE: usize = 1024;

/// Why a connection handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Shutdown was signaled.
    Shutdown,
    /// The client closed its end.
    PeerClosed,
    /// Reading from the client failed.
    ReadFailed,
    /// Writing to the client failed and the policy is to close.
    WriteFailed,
}

/// Echo bytes on `stream` until the client leaves, I/O fails, or shutdown.
///
/// The stream is dropped, and so closed, when this returns.
pub async fn handle_connection<S>(
    mut stream: S,
    conn_id: usize,
    shutdown: ShutdownToken,
    on_write_error: WriteErrorPolicy,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; BUFFER_SIZE];

    loop {
        if shutdown.is_cancelled() {
            return Disconnect::Shutdown;
        }

        let n = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Disconnect::Shutdown,
            result = stream.read(&mut buf) => match result {
                Ok(0) => {
                    debug!(conn_id, "Client closed connection");
                    return Disconnect::PeerClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(conn_id, error = %e, "Read failed");
                    return Disconnect::ReadFailed;
                }
            },
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Disconnect::Shutdown,
            result = stream.write(&buf[..n]) => result,
        };

        match result {
            Ok(written) if written < n => {
                trace!(conn_id, read = n, written, "Short write");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(conn_id, error = %e, "Write failed");
                if on_write_error == WriteErrorPolicy::Close {
                    return Disconnect::WriteFailed;
                }
            }
        }
    }
}
