//! Echo server lifecycle.
//!
//! [`Server::run`] binds the socket for a service name, runs the accept
//! loop until the shutdown token fires, then stops accepting, drains open
//! connections and removes the socket file.

mod accept;
mod echo;
mod registry;
mod socket;

pub use echo::{Disconnect, BUFFER_SIZE};
pub use registry::{ConnectionRegistry, DrainStats};
pub use socket::{bind_address, BoundSocket};

use crate::config::{
    validate_name, Config, ConfigError, WriteErrorPolicy, DEFAULT_BACKLOG, DEFAULT_DRAIN_TIMEOUT,
    DEFAULT_RECLAIM_STALE,
};
use crate::shutdown::ShutdownToken;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Accept task that is aborted if `run` is dropped before shutdown, so the
/// listener handle it holds is released along with the socket file.
struct AcceptTask(JoinHandle<()>);

impl Drop for AcceptTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Tunables for a server instance.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub backlog: i32,
    pub reclaim_stale: bool,
    pub drain_timeout: Duration,
    pub on_write_error: WriteErrorPolicy,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            reclaim_stale: DEFAULT_RECLAIM_STALE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            on_write_error: WriteErrorPolicy::default(),
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("listen unix {}: {}", .path.display(), .source)]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("accept loop for {} exited abnormally: {}", .path.display(), .source)]
    AcceptTask {
        path: PathBuf,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Server instance
#[derive(Debug)]
pub struct Server {
    name: String,
    address: PathBuf,
    options: ServerOptions,
}

impl Server {
    /// Create a server from resolved configuration.
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        let options = ServerOptions {
            backlog: config.backlog,
            reclaim_stale: config.reclaim_stale,
            drain_timeout: config.drain_timeout,
            on_write_error: config.on_write_error,
        };
        Self::with_options(&config.name, &config.socket_dir, options)
    }

    /// Create a server bound at `<socket_dir>/<name>.sock`.
    pub fn with_options(
        name: &str,
        socket_dir: &Path,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        validate_name(name)?;

        Ok(Server {
            name: name.to_string(),
            address: bind_address(socket_dir, name),
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Path {
        &self.address
    }

    /// Serve until `shutdown` fires.
    ///
    /// Fails only if the socket cannot be bound. When this returns, the
    /// socket file is gone and the listener is closed.
    pub async fn run(&self, shutdown: ShutdownToken) -> Result<(), ServerError> {
        let mut socket =
            BoundSocket::bind(&self.address, self.options.backlog, self.options.reclaim_stale)
                .map_err(|source| ServerError::Bind {
                    path: self.address.clone(),
                    source,
                })?;
        let Some(listener) = socket.listener() else {
            return Ok(());
        };
        info!(name = %self.name, address = %self.address.display(), "Server is running");

        let registry = ConnectionRegistry::new();
        let mut accept = AcceptTask(tokio::spawn(accept::accept_loop(
            listener,
            Arc::clone(&registry),
            shutdown.clone(),
            self.options.on_write_error,
        )));

        shutdown.cancelled().await;

        // The accept loop holds the other listener handle; once it returns,
        // closing the socket closes the descriptor and removes the file.
        let joined = (&mut accept.0).await;
        socket.close();

        let live = registry.len();
        let stats = registry.drain(self.options.drain_timeout).await;
        if stats.aborted > 0 {
            warn!(
                aborted = stats.aborted,
                timeout_ms = self.options.drain_timeout.as_millis() as u64,
                "Aborted connections still open after drain timeout"
            );
        }
        info!(
            name = %self.name,
            accepted = registry.accepted(),
            live,
            drained = stats.drained,
            "Server is terminated"
        );

        joined.map_err(|source| ServerError::AcceptTask {
            path: self.address.clone(),
            source,
        })
    }
}
