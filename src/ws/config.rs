#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MISSED_HEARTBEATS_LIMIT_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for WebSocket connection supervision.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the liveness monitor checks the heartbeat clock
    pub heartbeat_interval: Duration,
    /// Maximum time without a server heartbeat before the socket is considered dead
    pub missed_heartbeats_limit: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            missed_heartbeats_limit: DEFAULT_MISSED_HEARTBEATS_LIMIT_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The default waits a fixed five seconds before every attempt and never gives up.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before a reconnection attempt. With `backoff` set, this is the initial delay.
    pub delay: Duration,
    /// Optional exponential growth of the delay. `None` keeps the delay fixed.
    pub backoff: Option<BackoffConfig>,
    /// Maximum number of consecutive attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY_DURATION,
            backoff: None,
            max_attempts: None,
        }
    }
}

/// Exponential growth applied to [`ReconnectConfig::delay`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum backoff duration
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay: DEFAULT_MAX_BACKOFF_DURATION,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    fn exponential(&self) -> Option<ExponentialBackoff> {
        self.backoff.as_ref().map(|backoff| {
            ExponentialBackoffBuilder::default()
                .with_initial_interval(self.delay)
                .with_max_interval(backoff.max_delay)
                .with_multiplier(backoff.multiplier)
                .with_max_elapsed_time(None) // We handle max attempts separately
                .build()
        })
    }
}

/// Computes the delay before each reconnection attempt.
#[derive(Debug)]
pub(crate) struct ReconnectSchedule {
    config: ReconnectConfig,
    exponential: Option<ExponentialBackoff>,
    attempt: u32,
}

impl ReconnectSchedule {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        let exponential = config.exponential();
        Self {
            config,
            exponential,
            attempt: 0,
        }
    }

    /// Registers a failed or lost connection and returns how long to wait before the next
    /// attempt, or `None` once `max_attempts` is exhausted.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts
            && self.attempt >= max
        {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);

        match &mut self.exponential {
            Some(backoff) => backoff.next_backoff(),
            None => Some(self.config.delay),
        }
    }

    /// Number of reconnections scheduled since the last successful open.
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called on every successful open.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
        if let Some(backoff) = &mut self.exponential {
            backoff.reset();
        }
    }
}
