//! Worker thread owning the socket and every state transition.
//!
//! All transitions (connect, drop, backoff tick, replay, close) are
//! serialized through this thread's loop, so no two transitions ever race
//! for the same connection. Remote closes are observed by a monitor thread
//! reading a clone of the live stream; its notifications carry the socket
//! generation so a report from an already-replaced socket is discarded.

use std::{
    io,
    sync::atomic::{AtomicU8, Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select, unbounded};
use log::warn;

use crate::queue::BoundedQueue;
use crate::warner::DropWarner;

use super::backoff::BackoffState;
use super::config::ConnectionConfig;
use super::event::{ConnectionEvent, EventSink};
use super::transport::{ActiveConnection, SocketTarget, connect_transport};

/// Observable lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed, no attempt made yet.
    Idle = 0,
    /// A connect attempt is in flight or a retry is pending.
    Connecting = 1,
    /// The socket is established and writable.
    Open = 2,
    /// `close()` was requested and is being honoured.
    Closing = 3,
    /// Terminal: shut down, no further transitions.
    Closed = 4,
    /// Terminal: the retry budget is exhausted.
    Failed = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Closed,
            _ => Self::Failed,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// State cell shared between the handle and the worker so `write()` can
/// fail synchronously without a round trip to the worker.
pub(crate) struct SharedState(AtomicU8);

impl SharedState {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Worker-side transition. Never overwrites a pending `Closing` with a
    /// non-terminal state, so a connect completing after `close()` cannot
    /// resurrect the connection.
    pub fn advance(&self, next: ConnectionState) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let current = ConnectionState::from_u8(current);
                if current == ConnectionState::Closing && !next.is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }

    /// Handle-side close request. Returns `false` when already terminal.
    pub fn begin_close(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if ConnectionState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(ConnectionState::Closing as u8)
                }
            })
            .is_ok()
    }
}

/// Commands accepted by the worker thread.
pub(crate) enum Command {
    Write(Vec<u8>),
    Close(Sender<()>),
}

/// Report from a monitor thread that its socket was closed by the peer.
struct MonitorNotice {
    generation: u64,
    had_error: bool,
}

enum Incoming {
    Record(Vec<u8>),
    Close(Sender<()>),
    Disconnected { generation: u64, had_error: bool },
    SourceEnded,
    HandleGone,
}

impl From<Command> for Incoming {
    fn from(command: Command) -> Self {
        match command {
            Command::Write(data) => Self::Record(data),
            Command::Close(ack) => Self::Close(ack),
        }
    }
}

impl From<MonitorNotice> for Incoming {
    fn from(notice: MonitorNotice) -> Self {
        Self::Disconnected {
            generation: notice.generation,
            had_error: notice.had_error,
        }
    }
}

enum Outcome {
    /// The socket dropped; the reconnect policy decides what happens next.
    Dropped,
    /// The worker is done and must exit.
    Shutdown,
}

pub(crate) fn spawn(
    mut config: ConnectionConfig,
    shared: std::sync::Arc<SharedState>,
    events: EventSink,
) -> (Sender<Command>, thread::JoinHandle<()>) {
    let (tx, rx) = bounded(config.command_capacity);
    let queue = if config.recovery {
        Some(match config.recovery_queue_size_calculation.take() {
            Some(size_of) => BoundedQueue::new(config.recovery_queue_max_size, size_of),
            None => BoundedQueue::bytes(config.recovery_queue_max_size),
        })
    } else {
        None
    };
    let (monitor_tx, monitor_rx) = unbounded();
    let worker = Worker {
        rx,
        monitor_tx,
        monitor_rx,
        shared,
        events,
        target: config.target,
        reconnect: config.reconnect,
        reconnect_tries: config.reconnect_tries,
        connect_timeout: config.connect_timeout,
        write_timeout: config.write_timeout,
        replay_timeout: config.replay_timeout,
        backoff: BackoffState::new(config.backoff),
        warner: DropWarner::new(config.warn_interval),
        queue,
        source: config.source,
        generation: 0,
        retries_left: config.reconnect_tries,
        last_error: None,
        outage_reported: false,
    };
    let handle = thread::spawn(move || worker.run());
    (tx, handle)
}

struct Worker {
    rx: Receiver<Command>,
    /// Cloned into the monitor thread of each socket generation. Kept on a
    /// channel of its own so the worker holds no sender for `rx` and can
    /// observe the handle going away.
    monitor_tx: Sender<MonitorNotice>,
    monitor_rx: Receiver<MonitorNotice>,
    shared: std::sync::Arc<SharedState>,
    events: EventSink,
    target: SocketTarget,
    reconnect: bool,
    reconnect_tries: Option<u32>,
    connect_timeout: Duration,
    write_timeout: Duration,
    replay_timeout: Duration,
    backoff: BackoffState,
    warner: DropWarner,
    queue: Option<BoundedQueue<Vec<u8>>>,
    source: Option<Receiver<Vec<u8>>>,
    generation: u64,
    retries_left: Option<u32>,
    last_error: Option<String>,
    /// Whether the current outage has already produced a `SocketError` for
    /// writes accepted into the recovery buffer.
    outage_reported: bool,
}

impl Worker {
    fn run(mut self) {
        loop {
            self.shared.advance(ConnectionState::Connecting);
            match connect_transport(&self.target, self.connect_timeout) {
                Ok(mut conn) => {
                    if self.shared.get() == ConnectionState::Closing {
                        // close() raced the attempt; the late socket must
                        // not transition state.
                        let _ = conn.shutdown();
                        self.drain_until_close();
                        return;
                    }
                    match self.run_open(conn) {
                        Outcome::Shutdown => return,
                        Outcome::Dropped => {
                            if !self.reconnect {
                                self.shared.advance(ConnectionState::Closed);
                                self.events.emit(ConnectionEvent::Close);
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    self.last_error = Some(message.clone());
                    self.events.emit(ConnectionEvent::SocketError { message });
                    if !self.reconnect {
                        self.shared.advance(ConnectionState::Closed);
                        self.events.emit(ConnectionEvent::Close);
                        return;
                    }
                    if let Some(left) = self.retries_left.as_mut() {
                        if *left == 0 {
                            self.shared.advance(ConnectionState::Failed);
                            self.events.emit(ConnectionEvent::ReconnectFailure {
                                last_error: self.last_error.clone().unwrap_or_default(),
                            });
                            return;
                        }
                        *left -= 1;
                    }
                }
            }
            self.shared.advance(ConnectionState::Connecting);
            let delay = self.backoff.next_delay();
            if !self.wait_retry(delay) {
                return;
            }
        }
    }

    /// Drive an established socket until it drops or the worker shuts down.
    fn run_open(&mut self, mut conn: ActiveConnection) -> Outcome {
        self.generation += 1;
        let generation = self.generation;
        let _ = conn.set_write_timeout(self.write_timeout);
        match conn.monitor_clone() {
            Ok(Some(monitor)) => {
                let tx = self.monitor_tx.clone();
                thread::spawn(move || {
                    let had_error = monitor.wait_for_close();
                    let _ = tx.send(MonitorNotice {
                        generation,
                        had_error,
                    });
                });
            }
            Ok(None) => {}
            Err(err) => warn!("sockrelay: unable to monitor socket for close: {err}"),
        }

        self.backoff.reset();
        self.retries_left = self.reconnect_tries;
        self.outage_reported = false;
        self.shared.advance(ConnectionState::Open);
        self.events.emit(ConnectionEvent::Open {
            peer: conn.peer_label(),
        });

        if !self.replay(&mut conn) {
            let _ = conn.shutdown();
            self.events
                .emit(ConnectionEvent::SocketClose { had_error: true });
            return Outcome::Dropped;
        }

        loop {
            match self.next_incoming() {
                Incoming::Record(data) => {
                    if let Err(err) = conn.send(&data).and_then(|()| conn.flush()) {
                        self.on_send_failure(data, &err);
                        let _ = conn.shutdown();
                        self.events
                            .emit(ConnectionEvent::SocketClose { had_error: true });
                        return Outcome::Dropped;
                    }
                }
                Incoming::Close(ack) => {
                    let _ = conn.shutdown();
                    self.finish_close(ack);
                    return Outcome::Shutdown;
                }
                Incoming::Disconnected {
                    generation: observed,
                    had_error,
                } => {
                    if observed == generation {
                        let _ = conn.shutdown();
                        self.events
                            .emit(ConnectionEvent::SocketClose { had_error });
                        return Outcome::Dropped;
                    }
                }
                Incoming::SourceEnded => {
                    self.source = None;
                }
                Incoming::HandleGone => {
                    let _ = conn.shutdown();
                    self.shared.advance(ConnectionState::Closed);
                    return Outcome::Shutdown;
                }
            }
        }
    }

    /// Next unit of work: a command, a monitor notice, or a record from the
    /// upstream source. The source is only drained here, while the socket is
    /// open, which is what pauses piping across a disconnect.
    fn next_incoming(&self) -> Incoming {
        // The monitor channel never disconnects while the worker holds its
        // sender, so that arm only ever yields notices.
        if let Some(source) = &self.source {
            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(command) => Incoming::from(command),
                    Err(_) => Incoming::HandleGone,
                },
                recv(self.monitor_rx) -> msg => match msg {
                    Ok(notice) => Incoming::from(notice),
                    Err(_) => Incoming::HandleGone,
                },
                recv(source) -> msg => match msg {
                    Ok(data) => Incoming::Record(data),
                    Err(_) => Incoming::SourceEnded,
                },
            }
        } else {
            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(command) => Incoming::from(command),
                    Err(_) => Incoming::HandleGone,
                },
                recv(self.monitor_rx) -> msg => match msg {
                    Ok(notice) => Incoming::from(notice),
                    Err(_) => Incoming::HandleGone,
                },
            }
        }
    }

    /// Re-send buffered records oldest-first, one at a time. Returns `false`
    /// when a send fails; the failed record and its successors stay queued
    /// for the next successful reconnect.
    fn replay(&mut self, conn: &mut ActiveConnection) -> bool {
        let Some(queue) = self.queue.as_mut() else {
            return true;
        };
        if queue.is_empty() {
            return true;
        }
        let _ = conn.set_write_timeout(self.replay_timeout);
        let mut failure: Option<io::Error> = None;
        loop {
            let Some(record) = queue.peek() else { break };
            match conn.send(record).and_then(|()| conn.flush()) {
                Ok(()) => {
                    queue.dequeue();
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            let message = err.to_string();
            self.last_error = Some(message.clone());
            self.events.emit(ConnectionEvent::SocketError { message });
            return false;
        }
        let _ = conn.set_write_timeout(self.write_timeout);
        true
    }

    /// Wait out a backoff delay, still servicing commands. Returns `false`
    /// when the worker shut down during the wait.
    fn wait_retry(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(Command::Write(data)) => {
                    // Accepted while the connection was down: either the
                    // caller lost the race with a drop, or recovery mode let
                    // it through for buffering. The outage is reported once,
                    // not once per buffered record.
                    if !self.outage_reported {
                        self.outage_reported = true;
                        self.events.emit(ConnectionEvent::SocketError {
                            message: "connection is not open".into(),
                        });
                    }
                    self.stash(data);
                }
                Ok(Command::Close(ack)) => {
                    self.finish_close(ack);
                    return false;
                }
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => {
                    self.shared.advance(ConnectionState::Closed);
                    return false;
                }
            }
        }
    }

    fn on_send_failure(&mut self, data: Vec<u8>, err: &io::Error) {
        let message = err.to_string();
        self.last_error = Some(message.clone());
        self.events.emit(ConnectionEvent::SocketError { message });
        self.stash(data);
    }

    /// Route an undelivered record to the recovery queue, or count it as
    /// dropped when recovery is disabled or the record is oversized.
    fn stash(&mut self, data: Vec<u8>) {
        match self.queue.as_mut() {
            Some(queue) => {
                if queue.enqueue(data).is_err() {
                    self.warner.record_drop();
                    self.warner.warn_if_due(|count| {
                        warn!("sockrelay: dropped {count} records too large for the recovery queue");
                    });
                }
            }
            None => {
                self.warner.record_drop();
                self.warner.warn_if_due(|count| {
                    warn!("sockrelay: dropped {count} records while disconnected");
                });
            }
        }
    }

    fn finish_close(&mut self, ack: Sender<()>) {
        self.shared.advance(ConnectionState::Closed);
        self.events.emit(ConnectionEvent::End);
        let _ = ack.send(());
    }

    /// The connect attempt outlived `close()`; absorb commands until the
    /// close request arrives so the ack handshake still completes.
    fn drain_until_close(&mut self) {
        loop {
            match self.rx.recv() {
                Ok(Command::Close(ack)) => {
                    self.finish_close(ack);
                    return;
                }
                Ok(_) => {}
                Err(_) => {
                    self.shared.advance(ConnectionState::Closed);
                    return;
                }
            }
        }
    }
}
