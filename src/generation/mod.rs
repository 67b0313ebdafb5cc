// Music generation - the generator boundary and the outcome of a generation pass

pub mod phrase;
pub mod queue;

pub use phrase::{NoteEvent, Phrase, PhraseMap};
pub use queue::MusicGenerationQueue;

use crate::error::GenerationError;
use crate::song::SongContext;
use std::sync::Arc;

/// Black-box music generation engine
pub trait MusicGenerator: Send + Sync {
    /// Generate the phrases for `context`
    fn generate(&self, context: &SongContext) -> Result<PhraseMap, GenerationError>;
}

/// Outcome of one generation pass
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub song_context: SongContext,
    pub outcome: Result<Arc<PhraseMap>, GenerationError>,
}

impl GenerationResult {
    pub fn success(song_context: SongContext, phrases: PhraseMap) -> Self {
        Self {
            song_context,
            outcome: Ok(Arc::new(phrases)),
        }
    }

    pub fn failure(song_context: SongContext, error: GenerationError) -> Self {
        Self {
            song_context,
            outcome: Err(error),
        }
    }

    pub fn phrases(&self) -> Option<&Arc<PhraseMap>> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&GenerationError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
