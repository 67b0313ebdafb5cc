// Listener interfaces of the music controller
// Notifications are delivered on the controller's notification thread, after the
// output latency.

use crate::sequencer::timeline::Position;
use crate::session::SessionContext;
use crate::song::{ChordSymbolItem, SongPart};

pub trait PlaybackListener: Send + Sync {
    /// Session contexts this listener is interested in, None for all
    fn contexts(&self) -> Option<Vec<SessionContext>> {
        None
    }

    /// Position tracking was enabled or disabled for the current session
    fn enabled_changed(&self, _enabled: bool) {}

    fn beat_changed(&self, _old: Position, _new: Position, _position_in_beats: f32) {}

    fn chord_symbol_changed(&self, _chord: &ChordSymbolItem) {}

    fn song_part_changed(&self, _part: &SongPart) {}

    /// Note activity on `channel`, at most once per channel per activity period
    fn midi_activity(&self, _tick: u64, _channel: u8) {}
}

impl dyn PlaybackListener {
    pub(crate) fn accepts(&self, context: Option<SessionContext>) -> bool {
        match (self.contexts(), context) {
            (None, _) => true,
            (Some(contexts), Some(context)) => contexts.contains(&context),
            (Some(_), None) => false,
        }
    }
}

pub trait NoteListener: Send + Sync {
    fn note_on(&self, _tick: u64, _channel: u8, _pitch: u8, _velocity: u8) {}

    fn note_off(&self, _tick: u64, _channel: u8, _pitch: u8) {}
}
