// Playback settings - user preferences for click, precount and looping
//
// Preferences are persisted as RON. Every effective change is notified to the
// registered listeners (sessions use it to know their sequence is outdated).

use crate::error::SettingsError;
use crate::listeners::{ChangeListener, ListenerId, ListenerList};
use crate::sequencer::metronome::{self, ClickSound, PrecountMode};
use crate::sequencer::sequence::Sequence;
use crate::song::SongContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub use crate::sequencer::player::LOOP_CONTINUOUSLY;

const PREFERENCES_FILE_NAME: &str = "playback_preferences.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackPreferences {
    pub click_enabled: bool,
    pub click_channel: u8,
    pub click_pitch_high: u8,
    pub click_velocity_high: u8,
    pub click_pitch_low: u8,
    pub click_velocity_low: u8,
    pub precount_enabled: bool,
    pub precount_mode: PrecountMode,
    /// 0 = play once, LOOP_CONTINUOUSLY = until stopped
    pub loop_count: i32,
    /// Embed position/chord markers in generated sequences
    pub control_track_enabled: bool,
}

impl Default for PlaybackPreferences {
    fn default() -> Self {
        let sound = ClickSound::default();
        Self {
            click_enabled: false,
            click_channel: sound.channel,
            click_pitch_high: sound.pitch_high,
            click_velocity_high: sound.velocity_high,
            click_pitch_low: sound.pitch_low,
            click_velocity_low: sound.velocity_low,
            precount_enabled: false,
            precount_mode: PrecountMode::Auto,
            loop_count: 0,
            control_track_enabled: true,
        }
    }
}

impl PlaybackPreferences {
    pub fn click_sound(&self) -> ClickSound {
        ClickSound {
            channel: self.click_channel,
            pitch_high: self.click_pitch_high,
            velocity_high: self.click_velocity_high,
            pitch_low: self.click_pitch_low,
            velocity_low: self.click_velocity_low,
        }
    }
}

/// Serialize preferences to RON format
pub fn serialize_to_ron(prefs: &PlaybackPreferences) -> Result<String, SettingsError> {
    ron::ser::to_string_pretty(prefs, ron::ser::PrettyConfig::default()).map_err(|e| {
        SettingsError::Serialization(format!("Failed to serialize preferences to RON: {}", e))
    })
}

/// Deserialize preferences from RON format
pub fn deserialize_from_ron(data: &str) -> Result<PlaybackPreferences, SettingsError> {
    ron::from_str(data).map_err(|e| {
        SettingsError::Serialization(format!("Failed to deserialize preferences from RON: {}", e))
    })
}

/// Serialize preferences to JSON, for hosts exchanging them with other tools
pub fn serialize_to_json(prefs: &PlaybackPreferences) -> Result<String, SettingsError> {
    serde_json::to_string_pretty(prefs).map_err(|e| {
        SettingsError::Serialization(format!("Failed to serialize preferences to JSON: {}", e))
    })
}

pub fn deserialize_from_json(data: &str) -> Result<PlaybackPreferences, SettingsError> {
    serde_json::from_str(data).map_err(|e| {
        SettingsError::Serialization(format!("Failed to deserialize preferences from JSON: {}", e))
    })
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Shared playback settings service
pub struct PlaybackSettings {
    prefs: RwLock<PlaybackPreferences>,
    listeners: ListenerList<ChangeListener<PlaybackPreferences>>,
}

impl PlaybackSettings {
    pub fn new(prefs: PlaybackPreferences) -> Arc<Self> {
        Arc::new(Self {
            prefs: RwLock::new(prefs),
            listeners: ListenerList::new(),
        })
    }

    /// Default preferences file location
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::config_dir()
            .map(|dir| dir.join(crate::config::CONFIG_DIR_NAME).join(PREFERENCES_FILE_NAME))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Load preferences (RON, or JSON for a .json file), falling back to defaults
    /// if the file does not exist
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No preferences at {}, using defaults", path.display());
            return Ok(Self::new(PlaybackPreferences::default()));
        }
        let data = std::fs::read_to_string(path)?;
        let prefs = if is_json(path) {
            deserialize_from_json(&data)?
        } else {
            deserialize_from_ron(&data)?
        };
        Ok(Self::new(prefs))
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let prefs = self.preferences();
        let data = if is_json(path) {
            serialize_to_json(&prefs)?
        } else {
            serialize_to_ron(&prefs)?
        };
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Copy of the current preferences
    pub fn preferences(&self) -> PlaybackPreferences {
        match self.prefs.read() {
            Ok(prefs) => prefs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Modify the preferences; listeners are notified if something changed
    pub fn update(&self, f: impl FnOnce(&mut PlaybackPreferences)) {
        let changed = {
            let mut guard = match self.prefs.write() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("Playback preferences lock poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            let old = guard.clone();
            f(&mut guard);
            (*guard != old).then(|| guard.clone())
        };
        if let Some(new_prefs) = changed {
            debug!("Playback preferences changed: {:?}", new_prefs);
            self.listeners.for_each(|l| l(&new_prefs));
        }
    }

    pub fn add_change_listener(&self, listener: Arc<ChangeListener<PlaybackPreferences>>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn is_click_enabled(&self) -> bool {
        self.preferences().click_enabled
    }

    pub fn set_click_enabled(&self, enabled: bool) {
        self.update(|p| p.click_enabled = enabled);
    }

    pub fn is_precount_enabled(&self) -> bool {
        self.preferences().precount_enabled
    }

    pub fn set_precount_enabled(&self, enabled: bool) {
        self.update(|p| p.precount_enabled = enabled);
    }

    pub fn set_precount_mode(&self, mode: PrecountMode) {
        self.update(|p| p.precount_mode = mode);
    }

    pub fn loop_count(&self) -> i32 {
        self.preferences().loop_count
    }

    pub fn set_loop_count(&self, count: i32) {
        assert!(count >= LOOP_CONTINUOUSLY, "Invalid loop count {count}");
        self.update(|p| p.loop_count = count);
    }

    /// Append a click track for `context`, returns the track index
    pub fn add_click_track(&self, sequence: &mut Sequence, context: &SongContext) -> usize {
        metronome::add_click_track(sequence, context, &self.preferences().click_sound())
    }

    /// Shift the sequence and add a precount track, returns the song start tick
    pub fn add_precount_click_track(&self, sequence: &mut Sequence, context: &SongContext) -> u64 {
        let prefs = self.preferences();
        metronome::add_precount_click_track(sequence, context, &prefs.click_sound(), prefs.precount_mode)
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            prefs: RwLock::new(PlaybackPreferences::default()),
            listeners: ListenerList::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_change_notification_only_on_effective_change() {
        let settings = PlaybackSettings::new(PlaybackPreferences::default());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        settings.add_change_listener(Arc::new(move |_: &PlaybackPreferences| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        settings.set_click_enabled(true);
        settings.set_click_enabled(true);
        settings.set_loop_count(LOOP_CONTINUOUSLY);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(settings.is_click_enabled());
        assert_eq!(settings.loop_count(), LOOP_CONTINUOUSLY);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs").join(PREFERENCES_FILE_NAME);

        let settings = PlaybackSettings::new(PlaybackPreferences::default());
        settings.update(|p| {
            p.precount_enabled = true;
            p.precount_mode = PrecountMode::TwoBars;
            p.click_channel = 3;
        });
        settings.save_to(&path).unwrap();

        let loaded = PlaybackSettings::load_from(&path).unwrap();
        assert_eq!(loaded.preferences(), settings.preferences());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = PlaybackSettings::load_from(dir.path().join("none.ron")).unwrap();
        assert_eq!(loaded.preferences(), PlaybackPreferences::default());
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let prefs = deserialize_from_ron("(click_enabled: true)").unwrap();
        assert!(prefs.click_enabled);
        assert_eq!(prefs.click_channel, 9);
        assert!(deserialize_from_ron("(click_enabled: 12").is_err());
    }

    #[test]
    fn test_json_file_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        let settings = PlaybackSettings::new(PlaybackPreferences::default());
        settings.set_loop_count(4);
        settings.save_to(&path).unwrap();

        let data = std::fs::read_to_string(&path).unwrap();
        assert!(data.trim_start().starts_with('{'));
        assert_eq!(PlaybackSettings::load_from(&path).unwrap().loop_count(), 4);
    }
}
