// Error taxonomy for the playback core
//
// - Contract violations (caller-side bugs): PlaybackError::IllegalState / IllegalArgument
// - User-correctable generation and device problems: MusicGenerationError
// - Everything a generator can report: GenerationError

use thiserror::Error;

/// Human-readable, user-facing generation error.
///
/// Raised when music can't be generated or played for a reason the user can fix
/// (missing chord at a section start, no Midi output device, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MusicGenerationError {
    message: String,
}

impl MusicGenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned by the MusicController public API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Music generation error: {0}")]
    Generation(#[from] MusicGenerationError),
}

impl PlaybackError {
    /// True for caller-side contract violations
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PlaybackError::IllegalState(_) | PlaybackError::IllegalArgument(_)
        )
    }
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Failure reported by a music generator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Expected, user-correctable problem
    #[error("{0}")]
    UserFacing(#[from] MusicGenerationError),

    /// Anything else, including defects in the generator
    #[error("Unexpected generation failure: {0}")]
    Internal(String),
}

impl GenerationError {
    pub fn is_user_facing(&self) -> bool {
        matches!(self, GenerationError::UserFacing(_))
    }
}

/// Malformed Midi data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MidiDataError {
    #[error("Invalid status byte: 0x{0:02X}")]
    InvalidStatus(u8),

    #[error("Data byte out of range: {0}")]
    InvalidData(u8),

    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),

    #[error("Invalid meta message: {0}")]
    InvalidMeta(String),
}

/// Preferences/config persistence errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No configuration directory available")]
    NoConfigDir,
}
