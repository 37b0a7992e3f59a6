//! Retry delay schedules for reconnection attempts.

use std::fmt;
use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Default first retry delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
/// Default ceiling applied to every schedule.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
/// Default growth factor for the exponential schedule.
pub const DEFAULT_EXPONENTIAL_FACTOR: f64 = 2.0;

/// Pluggable delay schedule for [`BackoffStrategy::Custom`].
pub trait RetryDelay: Send {
    /// Produce the delay to wait before the next attempt.
    fn next_delay(&mut self) -> Duration;
    /// Return the schedule to its initial state.
    fn reset(&mut self);
}

/// Selects how reconnection delays grow between attempts.
///
/// The Fibonacci and exponential variants bound every delay by `max_delay`
/// and optionally jitter it: with `randomisation_factor` `r` in `[0, 1]`,
/// an emitted delay `d` becomes a uniform pick from `[d, d * (1 + r)]`.
pub enum BackoffStrategy {
    /// Successive sums of the two prior delays.
    Fibonacci {
        initial_delay: Duration,
        max_delay: Duration,
        randomisation_factor: f64,
    },
    /// `initial_delay * factor^attempt`.
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        factor: f64,
        randomisation_factor: f64,
    },
    /// Caller-supplied schedule.
    Custom(Box<dyn RetryDelay>),
}

impl BackoffStrategy {
    /// Fibonacci schedule with default timings and no jitter.
    pub fn fibonacci() -> Self {
        Self::Fibonacci {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            randomisation_factor: 0.0,
        }
    }

    /// Exponential schedule with default timings and no jitter.
    pub fn exponential() -> Self {
        Self::Exponential {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_EXPONENTIAL_FACTOR,
            randomisation_factor: 0.0,
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::fibonacci()
    }
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fibonacci {
                initial_delay,
                max_delay,
                randomisation_factor,
            } => f
                .debug_struct("Fibonacci")
                .field("initial_delay", initial_delay)
                .field("max_delay", max_delay)
                .field("randomisation_factor", randomisation_factor)
                .finish(),
            Self::Exponential {
                initial_delay,
                max_delay,
                factor,
                randomisation_factor,
            } => f
                .debug_struct("Exponential")
                .field("initial_delay", initial_delay)
                .field("max_delay", max_delay)
                .field("factor", factor)
                .field("randomisation_factor", randomisation_factor)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Walks a [`BackoffStrategy`], producing one jittered delay per attempt.
pub(crate) struct BackoffState {
    strategy: BackoffStrategy,
    // (current, next) pair for the Fibonacci walk.
    fib: (Duration, Duration),
    exp_current: Duration,
    rng: StdRng,
}

impl BackoffState {
    pub fn new(strategy: BackoffStrategy) -> Self {
        let mut state = Self {
            fib: (Duration::ZERO, Duration::ZERO),
            exp_current: Duration::ZERO,
            rng: StdRng::from_entropy(),
            strategy,
        };
        state.reset();
        state
    }

    /// Delay to wait before the next reconnection attempt.
    pub fn next_delay(&mut self) -> Duration {
        match &mut self.strategy {
            BackoffStrategy::Fibonacci {
                max_delay,
                randomisation_factor,
                ..
            } => {
                let (current, next) = self.fib;
                self.fib = (next, current.saturating_add(next).min(*max_delay));
                jitter(&mut self.rng, current, *randomisation_factor)
            }
            BackoffStrategy::Exponential {
                max_delay,
                factor,
                randomisation_factor,
                ..
            } => {
                let current = self.exp_current;
                // Grow in f64 space so a large factor saturates at the
                // ceiling instead of overflowing `Duration`.
                let grown = current.as_secs_f64() * *factor;
                self.exp_current = if grown.is_finite() && grown < max_delay.as_secs_f64() {
                    Duration::from_secs_f64(grown)
                } else {
                    *max_delay
                };
                jitter(&mut self.rng, current, *randomisation_factor)
            }
            BackoffStrategy::Custom(schedule) => schedule.next_delay(),
        }
    }

    /// Return the schedule to its first delay.
    pub fn reset(&mut self) {
        match &mut self.strategy {
            BackoffStrategy::Fibonacci { initial_delay, .. } => {
                self.fib = (*initial_delay, *initial_delay);
            }
            BackoffStrategy::Exponential { initial_delay, .. } => {
                self.exp_current = *initial_delay;
            }
            BackoffStrategy::Custom(schedule) => schedule.reset(),
        }
    }
}

fn jitter(rng: &mut StdRng, delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let scaled = delay.as_secs_f64() * (1.0 + rng.gen_range(0.0..=1.0) * factor);
    Duration::from_secs_f64(scaled)
}
