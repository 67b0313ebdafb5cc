// Core configuration - timing constants of the controller and the generation queue

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR_NAME: &str = "jjazz_playback";
const CONFIG_FILE_NAME: &str = "core.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Tempo the transport is pinned to; musical tempo is applied as a factor
    pub reference_tempo: f32,
    /// Minimum delay between two Midi activity notifications on a channel
    pub activity_min_period_ms: u64,
    /// Log a dump of each played sequence
    pub debug_played_sequence: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reference_tempo: 120.0,
            activity_min_period_ms: 100,
            debug_played_sequence: false,
        }
    }
}

impl ControllerConfig {
    pub fn activity_min_period(&self) -> Duration {
        Duration::from_millis(self.activity_min_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delay before a new generation starts, absorbs rapid successive changes
    pub pre_update_buffer_time_ms: u64,
    /// Pause after a generation before the next one can start
    pub post_update_sleep_time_ms: u64,
    /// Mailbox polling period of the worker thread
    pub poll_interval_ms: u64,
    /// Grace period given to threads on stop()
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pre_update_buffer_time_ms: 300,
            post_update_sleep_time_ms: 700,
            poll_interval_ms: 20,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn pre_update_buffer_time(&self) -> Duration {
        Duration::from_millis(self.pre_update_buffer_time_ms)
    }

    pub fn post_update_sleep_time(&self) -> Duration {
        Duration::from_millis(self.post_update_sleep_time_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub controller: ControllerConfig,
    pub queue: QueueConfig,
}

impl CoreConfig {
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(SettingsError::NoConfigDir)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let data = std::fs::read_to_string(path)?;
        ron::from_str(&data).map_err(|e| {
            SettingsError::Serialization(format!("Failed to deserialize config from RON: {}", e))
        })
    }

    /// Load the config if the file exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        if path.as_ref().exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default()).map_err(|e| {
            SettingsError::Serialization(format!("Failed to serialize config to RON: {}", e))
        })?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = CoreConfig::default();
        config.queue.pre_update_buffer_time_ms = 50;
        config.controller.debug_played_sequence = true;
        config.save_to(&path).unwrap();

        assert_eq!(CoreConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: CoreConfig = ron::from_str("(queue: (poll_interval_ms: 5))").unwrap();
        assert_eq!(config.queue.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.queue.pre_update_buffer_time_ms, 300);
        assert_eq!(config.controller.reference_tempo, 120.0);
    }

    #[test]
    fn test_load_or_default() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::load_or_default(dir.path().join("missing.ron")).unwrap();
        assert_eq!(config, CoreConfig::default());
    }
}
