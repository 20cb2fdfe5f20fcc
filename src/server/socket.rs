//! Listening socket ownership.
//!
//! [`BoundSocket`] holds both the OS listener and the socket file it
//! created. Closing releases the two together, exactly once, and `Drop`
//! closes on every path that does not do so explicitly.

use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Socket file path for a service: `<dir>/<name>.sock`.
pub fn bind_address(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.sock"))
}

/// A listener bound to a filesystem path, removed when closed.
#[derive(Debug)]
pub struct BoundSocket {
    listener: Option<Arc<UnixListener>>,
    path: PathBuf,
    owns_file: bool,
}

impl BoundSocket {
    /// Bind and listen at `path`.
    ///
    /// With `reclaim_stale`, a leftover socket file that refuses connections
    /// is removed and the bind retried once. A file that accepts connections
    /// belongs to a live instance and is left alone. If the retry fails the
    /// error is returned and nothing else is removed, since another process
    /// may have bound the path in between.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: &Path, backlog: i32, reclaim_stale: bool) -> io::Result<Self> {
        let std_listener = match create_listener(path, backlog) {
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && reclaim_stale && is_stale(path) => {
                warn!(address = %path.display(), "Removing stale socket file");
                std::fs::remove_file(path)?;
                create_listener(path, backlog)?
            }
            other => other?,
        };

        // From here on the file is ours; drop removes it if registration fails.
        let mut socket = BoundSocket {
            listener: None,
            path: path.to_path_buf(),
            owns_file: true,
        };
        socket.listener = Some(Arc::new(UnixListener::from_std(std_listener)?));
        Ok(socket)
    }

    /// Shared handle for the accept loop.
    ///
    /// Returns `None` once the socket has been closed.
    pub fn listener(&self) -> Option<Arc<UnixListener>> {
        self.listener.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none() && !self.owns_file
    }

    /// Close the listener and remove the socket file.
    ///
    /// The descriptor closes when the last listener handle drops; callers
    /// stop the accept loop first. Calling this again does nothing.
    pub fn close(&mut self) {
        drop(self.listener.take());
        if !std::mem::take(&mut self.owns_file) {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(address = %self.path.display(), "Socket file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(address = %self.path.display(), error = %e, "Failed to remove socket file")
            }
        }
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create a non-blocking Unix stream listener.
fn create_listener(path: &Path, backlog: i32) -> io::Result<std::os::unix::net::UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::unix(path)?)?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// A socket file nobody is listening on refuses connections.
///
/// The check never blocks: a full backlog reports `WouldBlock` and counts
/// as live. When the path is live the live instance does see one short
/// connection that closes without sending anything.
fn is_stale(path: &Path) -> bool {
    let check = Socket::new(Domain::UNIX, Type::STREAM, None).and_then(|socket| {
        socket.set_nonblocking(true)?;
        socket.connect(&SockAddr::unix(path)?)
    });

    match check {
        Ok(()) => false,
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => true,
        Err(e) => {
            info!(address = %path.display(), error = %e, "Treating socket file as live");
            false
        }
    }
}

/// Errors returned by accept once the listener itself is gone.
pub fn is_listener_closed(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::EINVAL))
}
