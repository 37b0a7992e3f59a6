//! Lifecycle events surfaced by a connection.

use crossbeam_channel::Sender;

/// Events published, in order of occurrence, on the channel returned by
/// [`Connection::events`](super::Connection::events).
///
/// `ReconnectFailure`, `Close` and `End` are terminal: no further events
/// follow them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket is established and writable.
    Open {
        /// Peer address, or socket path for unix domain sockets.
        peer: String,
    },
    /// A recoverable transport failure. May fire many times.
    SocketError { message: String },
    /// The underlying socket closed; a reconnect attempt follows when enabled.
    SocketClose { had_error: bool },
    /// Terminal: the retry budget is exhausted.
    ReconnectFailure { last_error: String },
    /// Terminal: the connection dropped and reconnection is disabled.
    Close,
    /// Terminal: graceful shutdown completed after `close()`.
    End,
}

/// Worker-side emitter feeding the subscriber channel and, when configured,
/// mirroring every event to a parent pipeline in emission order.
pub(crate) struct EventSink {
    local: Sender<ConnectionEvent>,
    parent: Option<Sender<ConnectionEvent>>,
}

impl EventSink {
    pub fn new(local: Sender<ConnectionEvent>, parent: Option<Sender<ConnectionEvent>>) -> Self {
        Self { local, parent }
    }

    /// Deliver an event. Disconnected subscribers are ignored.
    pub fn emit(&self, event: ConnectionEvent) {
        if let Some(parent) = &self.parent {
            let _ = parent.send(event.clone());
        }
        let _ = self.local.send(event);
    }
}
