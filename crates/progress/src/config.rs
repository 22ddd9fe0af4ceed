//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Tunables of the progress engine.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before an automatic pin taken by [`load_offline`](crate::ProgressEngine::load_offline) is dropped
    pub default_auto_release_secs: u64,

    /// Hand out rewards queued while no member was online
    pub replay_pending_rewards: bool,

    /// Store the display name passed to `load_online` even when the team is cached
    pub rename_on_login: bool,

    /// Wait for queued writes before shutting down
    pub flush_on_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_auto_release_secs: 60,
            replay_pending_rewards: true,
            rename_on_login: true,
            flush_on_shutdown: true,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Automatic release delay as a [`Duration`].
    pub fn default_auto_release(&self) -> Duration {
        Duration::from_secs(self.default_auto_release_secs)
    }

    /// Set the automatic release delay.
    pub fn with_default_auto_release(mut self, delay: Duration) -> Self {
        self.default_auto_release_secs = delay.as_secs();
        self
    }

    /// Enable or disable pending reward replay.
    pub fn with_replay_pending_rewards(mut self, enabled: bool) -> Self {
        self.replay_pending_rewards = enabled;
        self
    }

    /// Enable or disable renaming on login.
    pub fn with_rename_on_login(mut self, enabled: bool) -> Self {
        self.rename_on_login = enabled;
        self
    }

    /// Enable or disable the shutdown flush.
    pub fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }
}
