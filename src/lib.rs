//! hamon: an echo server on a Unix domain socket.
//!
//! The server binds `<socket-dir>/<name>.sock`, echoes back every chunk a
//! client sends, and on shutdown stops accepting, closes open connections
//! and removes the socket file.
//!
//! Features:
//! - One task per connection, no connection limit
//! - Explicit shutdown token shared by the accept loop and every connection
//! - Drain with timeout for connections still open at shutdown
//! - Stale socket file reclaim
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod server;
pub mod shutdown;
