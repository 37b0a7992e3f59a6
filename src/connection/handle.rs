//! Public connection type exported by the crate.

use std::{fmt, sync::Arc, thread, time::Duration};

use crossbeam_channel::{Receiver, TrySendError, bounded, unbounded};
use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

use crate::warner::DropWarner;

use super::builder::BuildError;
use super::config::ConnectionConfig;
use super::event::{ConnectionEvent, EventSink};
use super::worker::{self, Command, ConnectionState, SharedState};

/// Errors returned by [`Connection::write`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The connection reached a terminal state; no write can ever succeed.
    #[error("write after end")]
    AfterEnd,
    /// The socket is not open and recovery buffering is disabled.
    #[error("connection is not open")]
    NotConnected,
    /// The worker command channel is full.
    #[error("connection command queue is full")]
    QueueFull,
}

/// A single resilient outbound socket connection.
///
/// Construction starts a worker thread that dials the target immediately.
/// Records handed to [`write`](Self::write) are sent in submission order;
/// lifecycle events arrive on the channel returned by
/// [`events`](Self::events). Dropping the connection closes it.
pub struct Connection {
    tx: Option<crossbeam_channel::Sender<Command>>,
    events: Receiver<ConnectionEvent>,
    shared: Arc<SharedState>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    warner: DropWarner,
    recovery: bool,
    close_timeout: Duration,
}

impl Connection {
    /// Validate `config` and spawn the connection worker.
    pub fn with_config(config: ConnectionConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let shared = Arc::new(SharedState::new());
        let (event_tx, event_rx) = unbounded();
        let sink = EventSink::new(event_tx, config.parent_events.clone());
        let warner = DropWarner::new(config.warn_interval);
        let recovery = config.recovery;
        let close_timeout = config.connect_timeout + config.write_timeout;
        let (tx, handle) = worker::spawn(config, Arc::clone(&shared), sink);
        Ok(Self {
            tx: Some(tx),
            events: event_rx,
            shared,
            handle: Mutex::new(Some(handle)),
            warner,
            recovery,
            close_timeout,
        })
    }

    /// Subscribe to lifecycle events, delivered in order of occurrence.
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.events.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    /// Hand a record to the worker for asynchronous sending.
    ///
    /// While the socket is down, the record is accepted only when recovery
    /// buffering is enabled; it is then replayed after reconnection. Send
    /// failures are reported as [`ConnectionEvent::SocketError`], never
    /// through this return value.
    pub fn write(&self, record: Vec<u8>) -> Result<(), WriteError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(WriteError::AfterEnd);
        };
        match self.shared.get() {
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {
                Err(WriteError::AfterEnd)
            }
            ConnectionState::Open => self.dispatch(tx, record),
            ConnectionState::Idle | ConnectionState::Connecting => {
                if self.recovery {
                    self.dispatch(tx, record)
                } else {
                    Err(WriteError::NotConnected)
                }
            }
        }
    }

    fn dispatch(
        &self,
        tx: &crossbeam_channel::Sender<Command>,
        record: Vec<u8>,
    ) -> Result<(), WriteError> {
        match tx.try_send(Command::Write(record)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.warner.record_drop();
                self.warner.warn_if_due(|count| {
                    warn!("sockrelay: command queue full; dropped {count} records");
                });
                Err(WriteError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(WriteError::AfterEnd),
        }
    }

    /// Gracefully shut the connection down and join the worker.
    ///
    /// Cancels any pending reconnect; subsequent writes fail with
    /// [`WriteError::AfterEnd`]. Idempotent.
    pub fn close(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.shared.begin_close();
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(Command::Close(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(self.close_timeout);
        }
        drop(tx);
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            warn!("sockrelay: connection worker thread panicked");
        }
        if self.shared.get() == ConnectionState::Closing {
            // The worker was already gone; record the terminal state.
            self.shared.advance(ConnectionState::Closed);
        }
        self.warner.flush(|count| {
            warn!("sockrelay: dropped {count} records before close");
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("recovery", &self.recovery)
            .finish()
    }
}
