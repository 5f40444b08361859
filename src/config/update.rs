use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Retry policy for read-modify-write updates
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpdateConfig {
    /// Maximum number of conflict retries per `guaranteed_update` call.
    ///
    /// `0` retries until the caller cancels or the update times out.
    ///
    /// Default: 0
    #[serde(default)]
    pub max_retries: u32,

    /// Deadline applied to `guaranteed_update` calls that did not supply one.
    ///
    /// Default: 30000
    #[serde(default = "default_update_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            default_timeout_ms: default_update_timeout_ms(),
        }
    }
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "update.default_timeout_ms must be greater than 0".into(),
            )));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

const fn default_update_timeout_ms() -> u64 {
    30_000
}
