use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Configuration for the watch engine
///
/// # Configuration Example
///
/// ```toml
/// [watch]
/// watcher_buffer_size = 100
/// stream_buffer_size = 16
/// progress_notify_interval_ms = 5000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each subscription's delivery queue
    ///
    /// The broadcaster never blocks on a subscriber: once this queue is full the
    /// subscription is closed with `Overflow` and the consumer must re-list.
    ///
    /// **Tuning Guidelines**:
    /// - Fast consumers (< 1ms processing): 50-100
    /// - Slow consumers or bursty writers: 500-1000
    ///
    /// **Default**: 100
    #[serde(default = "default_watcher_buffer_size")]
    pub watcher_buffer_size: usize,

    /// Capacity of the consumer-facing event channel of each watch stream
    ///
    /// **Default**: 16
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    /// Interval between progress bookmarks sent to watchers that asked for
    /// progress notifications.
    ///
    /// **Default**: 5000
    #[serde(default = "default_progress_notify_interval_ms")]
    pub progress_notify_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watcher_buffer_size: default_watcher_buffer_size(),
            stream_buffer_size: default_stream_buffer_size(),
            progress_notify_interval_ms: default_progress_notify_interval_ms(),
        }
    }
}

impl WatchConfig {
    /// Validates watch configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.watcher_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.watcher_buffer_size must be greater than 0".into(),
            )));
        }

        if self.watcher_buffer_size > 100_000 {
            warn!(
                "watch.watcher_buffer_size ({}) is very large. Each watcher may buffer that many events",
                self.watcher_buffer_size
            );
        }

        if self.stream_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.stream_buffer_size must be greater than 0".into(),
            )));
        }

        if self.progress_notify_interval_ms < 10 {
            return Err(Error::Config(ConfigError::Message(
                "watch.progress_notify_interval_ms must be at least 10ms".into(),
            )));
        }

        Ok(())
    }

    pub fn progress_notify_interval(&self) -> Duration {
        Duration::from_millis(self.progress_notify_interval_ms)
    }
}

const fn default_watcher_buffer_size() -> usize {
    100
}

const fn default_stream_buffer_size() -> usize {
    16
}

const fn default_progress_notify_interval_ms() -> u64 {
    5000
}
