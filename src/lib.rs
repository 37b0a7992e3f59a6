//! Resilient outbound socket forwarding for streams of byte records.
//!
//! `sockrelay` owns the lifecycle of a single outbound connection (plain
//! TCP, TLS, a unix domain socket, or a connected UDP socket) and forwards
//! opaque byte records to it. When the connection drops, it reconnects with
//! a configurable backoff schedule, and optionally buffers undelivered
//! records in a size-bounded FIFO queue for replay once the socket is back.
//!
//! ```no_run
//! use sockrelay::{ConnectionBuilder, ConnectionEvent};
//!
//! let mut connection = ConnectionBuilder::new()
//!     .with_tcp("logs.example.com", 9020)
//!     .with_reconnect(true)
//!     .with_recovery(true)
//!     .build()
//!     .expect("valid configuration");
//!
//! let events = connection.events();
//! while let Ok(event) = events.recv() {
//!     if matches!(event, ConnectionEvent::Open { .. }) {
//!         break;
//!     }
//! }
//! connection.write(b"hello\n".to_vec()).expect("connection accepts writes");
//! connection.close();
//! ```

pub mod connection;
pub mod queue;
pub mod warner;

pub use connection::{
    BackoffStrategy, BuildError, Connection, ConnectionBuilder, ConnectionConfig, ConnectionEvent,
    ConnectionState, RetryDelay, SocketTarget, TlsOptions, WriteError,
};
pub use queue::{BoundedQueue, QueueError, SizeCalculation};
