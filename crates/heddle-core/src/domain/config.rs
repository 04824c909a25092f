//! Worker configuration (dispatcher policy, managed continuations, polling).
//!
//! Every field has a default so a config file only needs to name what it
//! changes. Files are JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved timer id and signal name used by managed continuations.
pub const CONTINUE_TIMER: &str = "FSM.ContinueWorkflow";
pub const CONTINUE_SIGNAL: &str = "FSM.ContinueWorkflow";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Whether work scheduled earlier in the same decision-task pass (decided but
/// not yet acknowledged by the service) blocks a continuation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingWorkPolicy {
    /// Only scheduled-and-unresolved work found in history counts.
    #[default]
    Acknowledged,

    /// Activities scheduled by decisions accumulated in this pass count too.
    IncludeUndelivered,
}

/// Managed continuation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Signal a continuation once an event id exceeds this.
    pub history_size: i64,

    /// Delay of the retry timer when work is still outstanding.
    pub timer_retry_seconds: u64,

    pub pending_work: PendingWorkPolicy,
}

impl ContinuationConfig {
    pub fn new(history_size: i64, timer_retry_seconds: u64) -> Self {
        Self {
            history_size,
            timer_retry_seconds,
            pending_work: PendingWorkPolicy::default(),
        }
    }

    pub fn with_pending_work(mut self, policy: PendingWorkPolicy) -> Self {
        self.pending_work = policy;
        self
    }

    pub fn timer_retry(&self) -> Duration {
        Duration::from_secs(self.timer_retry_seconds)
    }
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self::new(1000, 30)
    }
}

/// Decision-task concurrency policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DispatcherConfig {
    /// Handle on the polling task, one at a time.
    Inline,

    /// One new tokio task per decision task, unbounded.
    Spawn,

    /// Fixed pool of `workers` fed from a queue of `queue_capacity`.
    Bounded {
        workers: usize,
        #[serde(default = "default_queue_capacity")]
        queue_capacity: usize,
    },
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig::Bounded {
            workers: 8,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Top-level worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub domain: String,
    pub task_list: String,
    pub identity: String,

    /// How long one poll waits for a decision task before returning empty.
    pub poll_timeout_ms: u64,

    pub dispatcher: DispatcherConfig,
    pub continuations: ContinuationConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            task_list: "decisions".to_string(),
            identity: "heddle-worker".to_string(),
            poll_timeout_ms: 1_000,
            dispatcher: DispatcherConfig::default(),
            continuations: ContinuationConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let DispatcherConfig::Bounded {
            workers,
            queue_capacity,
        } = self.dispatcher
        {
            if workers == 0 {
                return Err(ConfigError::Invalid("dispatcher.workers must be > 0".into()));
            }
            if queue_capacity == 0 {
                return Err(ConfigError::Invalid(
                    "dispatcher.queue_capacity must be > 0".into(),
                ));
            }
        }
        if self.continuations.history_size <= 0 {
            return Err(ConfigError::Invalid(
                "continuations.history_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}
