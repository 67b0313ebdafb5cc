// JJazz playback core - Library exports for hosts, tests and benchmarks

pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod listeners;
pub mod logging;
pub mod messaging;
pub mod midi;
pub mod sequencer;
pub mod services;
pub mod session;
pub mod settings;
pub mod song;

// Re-export commonly used types for convenience
pub use config::{ControllerConfig, CoreConfig, QueueConfig};
pub use controller::{ControllerChange, ControllerState, LockToken, MusicController, NoteListener, PlaybackListener};
pub use error::{GenerationError, MusicGenerationError, PlaybackError, PlaybackResult};
pub use generation::{GenerationResult, MusicGenerationQueue, MusicGenerator, Phrase, PhraseMap};
pub use messaging::{Notification, UserNotifier, create_notification_channel};
pub use midi::{MetaMessage, OutputSynthManager, ShortMessage};
pub use sequencer::{ControlTrack, Position, Sequence, SequencerPort, SoftSequencer, Tempo, TimeSignature};
pub use services::PlaybackServices;
pub use session::{PlaybackSession, SessionContext, SessionState, SongPlaybackSession};
pub use settings::{PlaybackPreferences, PlaybackSettings};
pub use song::{BarRange, Song, SongContext};
