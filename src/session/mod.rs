// Playback sessions - what the controller plays
//
// A session owns an immutable generated sequence plus the playback parameters
// (tempo, loop, mute states). Lifecycle: New -> Generated -> Closed.

pub mod song_session;

pub use song_session::SongPlaybackSession;

use crate::error::PlaybackResult;
use crate::listeners::{ChangeListener, ListenerId};
use crate::sequencer::control_track::ControlTrack;
use crate::sequencer::sequence::Sequence;
use crate::song::{BarRange, SongContext};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    New,
    Generated,
    Closed,
}

/// What a session is used for, lets listeners filter notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionContext {
    Song,
    Arranger,
    RhythmPreview,
    ChordSymbolPreview,
    Other,
}

/// Change notified by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { old: SessionState, new: SessionState },
    /// The generated sequence no longer matches the song data
    DirtyChanged(bool),
    TempoChanged { old: f32, new: f32 },
    TracksMuteChanged,
    LoopCountChanged(i32),
}

/// Session unique identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait PlaybackSession: Send + Sync {
    fn id(&self) -> SessionId;
    fn state(&self) -> SessionState;
    fn context(&self) -> SessionContext;

    /// Build the sequence. Only valid in the New state.
    fn generate(&self, silent: bool) -> PlaybackResult<()>;

    /// The generated sequence, None before generation or after close
    fn sequence(&self) -> Option<Arc<Sequence>>;
    /// Tempo in BPM
    fn tempo(&self) -> f32;
    fn loop_start_tick(&self) -> u64;
    /// -1 means end of the sequence
    fn loop_end_tick(&self) -> i64;
    fn loop_count(&self) -> i32;
    /// None means the whole song
    fn bar_range(&self) -> Option<BarRange>;
    /// Sequence track index -> muted
    fn tracks_mute_status(&self) -> HashMap<usize, bool>;
    fn is_dirty(&self) -> bool;
    fn close(&self);

    fn add_listener(&self, listener: Arc<ChangeListener<SessionEvent>>) -> ListenerId;
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn control_track_provider(&self) -> Option<&dyn ControlTrackProvider> {
        None
    }

    fn song_context_provider(&self) -> Option<&dyn SongContextProvider> {
        None
    }

    fn end_of_playback_action(&self) -> Option<&dyn EndOfPlaybackActionProvider> {
        None
    }
}

/// Session embedding position and chord symbol markers
pub trait ControlTrackProvider {
    fn control_track(&self) -> Option<Arc<ControlTrack>>;
    fn is_control_track_enabled(&self) -> bool;
}

/// Session built from a song
pub trait SongContextProvider {
    fn song_context(&self) -> &SongContext;
    /// Tick of the first bar of the context (after the precount if any)
    fn song_start_tick(&self) -> u64;
}

/// Session with an action to run once playback is stopped or paused
pub trait EndOfPlaybackActionProvider {
    fn run_end_of_playback_action(&self);
}
