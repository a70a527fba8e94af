use orrery_core::{OrreryError, OrreryResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff between attempts of the same stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Multiplier applied per further retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    /// Cap for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy with no delay between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            backoff_factor: 1,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let delay = self
            .initial_delay_ms
            .saturating_mul(u64::from(self.backoff_factor).saturating_pow(exponent));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Tunables for the orchestrator. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Worker pool size.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Queue bound; `None` means unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Per-stage timeout applied when a descriptor omits one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retry budget applied when a descriptor omits one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Time an invocation gets to unwind after its cancellation token fires.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Terminal tasks older than this are evicted from memory.
    #[serde(default)]
    pub retention_secs: Option<u64>,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            queue_capacity: None,
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            retry: RetryPolicy::default(),
            cancel_grace_ms: default_cancel_grace_ms(),
            retention_secs: None,
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl OrchestratorConfig {
    /// Rejects settings the orchestrator cannot run with.
    pub fn validate(&self) -> OrreryResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(OrreryError::Config(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(OrreryError::Config(
                "queue_capacity must be at least 1 when set".to_string(),
            ));
        }
        if self.retry.backoff_factor == 0 {
            return Err(OrreryError::Config(
                "retry.backoff_factor must be at least 1".to_string(),
            ));
        }
        if self.retention_secs.is_some() && self.eviction_interval_secs == 0 {
            return Err(OrreryError::Config(
                "eviction_interval_secs must be at least 1 when retention is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_concurrent_tasks() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_cancel_grace_ms() -> u64 {
    1_000
}

fn default_eviction_interval_secs() -> u64 {
    60
}
