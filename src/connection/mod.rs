//! Resilient outbound connection management.
//!
//! This module owns the lifecycle of a single stream-oriented connection
//! (plain TCP, TLS, unix domain socket, or a connected UDP socket), the
//! retry/backoff policy applied when the connection drops, and the bounded
//! recovery buffer used to replay writes that could not be delivered.

pub(crate) mod backoff;
mod builder;
mod config;
mod event;
mod handle;
mod transport;
mod worker;


pub use backoff::{BackoffStrategy, RetryDelay};
pub use builder::{BuildError, ConnectionBuilder};
pub use config::{
    ConnectionConfig, DEFAULT_COMMAND_CAPACITY, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_RECOVERY_QUEUE_MAX_SIZE, DEFAULT_REPLAY_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use event::ConnectionEvent;
pub use handle::{Connection, WriteError};
pub use transport::{SocketTarget, TlsOptions};
pub use worker::ConnectionState;
