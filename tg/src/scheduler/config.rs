//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max concurrently running items
    #[serde(default = "default_max_concurrent", rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Upper bound on how long the loop waits before re-checking state
    #[serde(default = "default_poll_interval_ms", rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Channel buffer size for completions and handle requests
    #[serde(default = "default_channel_buffer", rename = "channel-buffer")]
    pub channel_buffer: usize,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity", rename = "event-capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_channel_buffer() -> usize {
    256
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_buffer: default_channel_buffer(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SchedulerConfig {
    /// Config with the given concurrency bound and defaults otherwise
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Policy applied to items built from configuration (job files)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDefaults {
    /// Maximum attempts per item
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms", rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Per-attempt deadline in milliseconds
    #[serde(default, rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

impl Default for ItemDefaults {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: None,
        }
    }
}

impl ItemDefaults {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}
