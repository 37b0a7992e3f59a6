//! Connection configuration and defaults.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::queue::SizeCalculation;
use crate::warner::DEFAULT_WARN_INTERVAL;

use super::backoff::BackoffStrategy;
use super::builder::BuildError;
use super::event::ConnectionEvent;
use super::transport::SocketTarget;

/// Default bounded capacity of the worker command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;
/// Default timeout applied when establishing sockets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout applied to live socket writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default per-item timeout while replaying the recovery queue.
pub const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(1);
/// Default cumulative size bound of the recovery queue, in bytes.
pub const DEFAULT_RECOVERY_QUEUE_MAX_SIZE: usize = 1024;

/// Everything a [`Connection`](super::Connection) needs at construction.
///
/// Usually assembled through [`ConnectionBuilder`](super::ConnectionBuilder);
/// `ConnectionConfig::new` plus field updates is the low-level route.
pub struct ConnectionConfig {
    /// Destination to dial.
    pub target: SocketTarget,
    /// Retry connection establishment after a drop.
    pub reconnect: bool,
    /// Retries allowed after the initial failure of an outage.
    /// `None` retries without bound.
    pub reconnect_tries: Option<u32>,
    /// Delay schedule between reconnection attempts.
    pub backoff: BackoffStrategy,
    /// Buffer failed writes for replay after reconnection.
    pub recovery: bool,
    /// Cumulative size bound of the recovery queue.
    pub recovery_queue_max_size: usize,
    /// Size calculation for queued records. Defaults to byte length.
    pub recovery_queue_size_calculation: Option<SizeCalculation<Vec<u8>>>,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// Bound on each buffered item during replay, so a stalled peer cannot
    /// block the queue indefinitely.
    pub replay_timeout: Duration,
    /// Capacity of the channel feeding the worker thread.
    pub command_capacity: usize,
    /// Interval between dropped-record warnings.
    pub warn_interval: Duration,
    /// Upstream record source piped into the socket while open.
    pub source: Option<Receiver<Vec<u8>>>,
    /// Mirror every lifecycle event into an enclosing pipeline.
    pub parent_events: Option<Sender<ConnectionEvent>>,
}

impl ConnectionConfig {
    /// Configuration with defaults for everything but the target.
    pub fn new(target: SocketTarget) -> Self {
        Self {
            target,
            reconnect: false,
            reconnect_tries: None,
            backoff: BackoffStrategy::default(),
            recovery: false,
            recovery_queue_max_size: DEFAULT_RECOVERY_QUEUE_MAX_SIZE,
            recovery_queue_size_calculation: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            replay_timeout: DEFAULT_REPLAY_TIMEOUT,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            warn_interval: DEFAULT_WARN_INTERVAL,
            source: None,
            parent_events: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.command_capacity == 0 {
            return Err(BuildError::invalid("command_capacity must be greater than zero"));
        }
        if self.recovery && self.recovery_queue_max_size == 0 {
            return Err(BuildError::invalid(
                "recovery_queue_max_size must be greater than zero",
            ));
        }
        match &self.backoff {
            BackoffStrategy::Fibonacci {
                initial_delay,
                max_delay,
                randomisation_factor,
            } => validate_schedule(*initial_delay, *max_delay, *randomisation_factor, None),
            BackoffStrategy::Exponential {
                initial_delay,
                max_delay,
                factor,
                randomisation_factor,
            } => validate_schedule(
                *initial_delay,
                *max_delay,
                *randomisation_factor,
                Some(*factor),
            ),
            BackoffStrategy::Custom(_) => Ok(()),
        }
    }
}

fn validate_schedule(
    initial_delay: Duration,
    max_delay: Duration,
    randomisation_factor: f64,
    factor: Option<f64>,
) -> Result<(), BuildError> {
    if initial_delay.is_zero() {
        return Err(BuildError::invalid("backoff initial_delay must be non-zero"));
    }
    if max_delay < initial_delay {
        return Err(BuildError::invalid(
            "backoff max_delay must be at least initial_delay",
        ));
    }
    if !(0.0..=1.0).contains(&randomisation_factor) {
        return Err(BuildError::invalid(
            "backoff randomisation_factor must be within [0, 1]",
        ));
    }
    if let Some(factor) = factor
        && !(factor.is_finite() && factor >= 1.0)
    {
        return Err(BuildError::invalid("backoff factor must be finite and at least 1"));
    }
    Ok(())
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("target", &self.target)
            .field("reconnect", &self.reconnect)
            .field("reconnect_tries", &self.reconnect_tries)
            .field("backoff", &self.backoff)
            .field("recovery", &self.recovery)
            .field("recovery_queue_max_size", &self.recovery_queue_max_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("replay_timeout", &self.replay_timeout)
            .field("command_capacity", &self.command_capacity)
            .finish()
    }
}
