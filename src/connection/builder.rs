//! Builder for [`Connection`] instances.
//!
//! Validates the destination and transport options before any thread is
//! spawned: the destination must be exactly one of TCP, UDP, or a unix
//! socket path, and transport encryption is only meaningful for TCP.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::queue::SizeCalculation;

use super::backoff::BackoffStrategy;
use super::config::ConnectionConfig;
use super::event::ConnectionEvent;
use super::handle::Connection;
use super::transport::{SocketTarget, TlsOptions};

/// Errors raised while constructing a connection.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid connection configuration: {0}")]
    InvalidConfig(String),
}

impl BuildError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[derive(Clone, Debug)]
enum Destination {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Unix { path: PathBuf },
}

#[derive(Clone, Debug)]
struct TlsConfig {
    domain: Option<String>,
    insecure: bool,
}

/// Builder assembling a [`ConnectionConfig`] and spawning the worker.
#[derive(Default)]
pub struct ConnectionBuilder {
    destinations: Vec<Destination>,
    tls: Option<TlsConfig>,
    reconnect: bool,
    reconnect_tries: Option<u32>,
    backoff: Option<BackoffStrategy>,
    recovery: bool,
    recovery_queue_max_size: Option<usize>,
    recovery_queue_size_calculation: Option<SizeCalculation<Vec<u8>>>,
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    replay_timeout: Option<Duration>,
    command_capacity: Option<usize>,
    warn_interval: Option<Duration>,
    source: Option<Receiver<Vec<u8>>>,
    parent_events: Option<Sender<ConnectionEvent>>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dial a TCP endpoint.
    pub fn with_tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.destinations.push(Destination::Tcp {
            host: host.into(),
            port,
        });
        self
    }

    /// Dial a UDP endpoint.
    pub fn with_udp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.destinations.push(Destination::Udp {
            host: host.into(),
            port,
        });
        self
    }

    /// Dial a unix domain socket.
    pub fn with_unix_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.destinations.push(Destination::Unix { path: path.into() });
        self
    }

    /// Enable TLS. `domain` defaults to the TCP host; `insecure` skips peer
    /// certificate validation.
    pub fn with_tls(mut self, domain: Option<String>, insecure: bool) -> Self {
        self.tls = Some(TlsConfig { domain, insecure });
        self
    }

    /// Automatically retry connection establishment after a drop.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Cap the retries attempted per outage. Unlimited when unset.
    pub fn with_reconnect_tries(mut self, tries: u32) -> Self {
        self.reconnect_tries = Some(tries);
        self
    }

    /// Replace the default Fibonacci backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Buffer failed writes for replay after reconnection.
    pub fn with_recovery(mut self, recovery: bool) -> Self {
        self.recovery = recovery;
        self
    }

    /// Cumulative size bound of the recovery queue.
    pub fn with_recovery_queue_max_size(mut self, max_size: usize) -> Self {
        self.recovery_queue_max_size = Some(max_size);
        self
    }

    /// Size calculation for queued records. Defaults to byte length.
    pub fn with_recovery_queue_size_calculation(
        mut self,
        size_of: SizeCalculation<Vec<u8>>,
    ) -> Self {
        self.recovery_queue_size_calculation = Some(size_of);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Bound each buffered item during replay.
    pub fn with_replay_timeout(mut self, timeout: Duration) -> Self {
        self.replay_timeout = Some(timeout);
        self
    }

    /// Capacity of the channel feeding the worker thread.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = Some(capacity);
        self
    }

    /// Interval between dropped-record warnings.
    pub fn with_warn_interval(mut self, interval: Duration) -> Self {
        self.warn_interval = Some(interval);
        self
    }

    /// Pipe records from `source` into the socket while it is open.
    pub fn with_source(mut self, source: Receiver<Vec<u8>>) -> Self {
        self.source = Some(source);
        self
    }

    /// Mirror every lifecycle event into `parent` in emission order.
    pub fn forward_events_to(mut self, parent: Sender<ConnectionEvent>) -> Self {
        self.parent_events = Some(parent);
        self
    }

    /// Validate the configuration and spawn the connection worker.
    pub fn build(self) -> Result<Connection, BuildError> {
        let target = self.resolve_target()?;
        let mut config = ConnectionConfig::new(target);
        config.reconnect = self.reconnect;
        config.reconnect_tries = self.reconnect_tries;
        if let Some(backoff) = self.backoff {
            config.backoff = backoff;
        }
        config.recovery = self.recovery;
        if let Some(max_size) = self.recovery_queue_max_size {
            config.recovery_queue_max_size = max_size;
        }
        config.recovery_queue_size_calculation = self.recovery_queue_size_calculation;
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.write_timeout {
            config.write_timeout = timeout;
        }
        if let Some(timeout) = self.replay_timeout {
            config.replay_timeout = timeout;
        }
        if let Some(capacity) = self.command_capacity {
            config.command_capacity = capacity;
        }
        if let Some(interval) = self.warn_interval {
            config.warn_interval = interval;
        }
        config.source = self.source;
        config.parent_events = self.parent_events;
        Connection::with_config(config)
    }

    fn resolve_target(&self) -> Result<SocketTarget, BuildError> {
        let mut destinations = self.destinations.iter();
        let Some(destination) = destinations.next() else {
            return Err(BuildError::invalid(
                "a destination transport is required (tcp, udp, or unix socket path)",
            ));
        };
        if destinations.next().is_some() {
            return Err(BuildError::invalid(
                "host+port and unix socket destinations are mutually exclusive",
            ));
        }
        match destination {
            Destination::Tcp { host, port } => {
                let tls = self.tls.as_ref().map(|tls| TlsOptions {
                    domain: tls.domain.clone().unwrap_or_else(|| host.clone()),
                    insecure_skip_verify: tls.insecure,
                });
                Ok(SocketTarget::Tcp {
                    host: host.clone(),
                    port: *port,
                    tls,
                })
            }
            Destination::Udp { host, port } => {
                if self.tls.is_some() {
                    return Err(BuildError::invalid(
                        "transport encryption over datagram sockets is unsupported",
                    ));
                }
                Ok(SocketTarget::Udp {
                    host: host.clone(),
                    port: *port,
                })
            }
            Destination::Unix { path } => {
                if self.tls.is_some() {
                    return Err(BuildError::invalid(
                        "tls is not supported for unix socket destinations",
                    ));
                }
                Ok(SocketTarget::Unix { path: path.clone() })
            }
        }
    }
}
