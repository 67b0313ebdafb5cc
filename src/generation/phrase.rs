// Phrase - Notes produced by a music generator for one instrument
// Positions are in beats from the start of the generated song context

use crate::midi::event::ShortMessage;
use crate::sequencer::sequence::{MidiEvent, Track};
use crate::sequencer::timeline::beats_to_ticks;
use std::collections::BTreeMap;
use tracing::error;

/// A note of a phrase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// MIDI note number (0-127, where 60 = C4)
    pub pitch: u8,
    pub velocity: u8,
    pub position_in_beats: f32,
    pub duration_in_beats: f32,
}

impl NoteEvent {
    pub fn new(pitch: u8, velocity: u8, position_in_beats: f32, duration_in_beats: f32) -> Self {
        assert!(pitch <= 127, "MIDI pitch must be 0-127");
        assert!(velocity <= 127, "MIDI velocity must be 0-127");
        assert!(position_in_beats >= 0.0, "Note position must be >= 0");
        assert!(duration_in_beats > 0.0, "Note duration must be > 0");

        Self {
            pitch,
            velocity,
            position_in_beats,
            duration_in_beats,
        }
    }

    pub fn end_in_beats(&self) -> f32 {
        self.position_in_beats + self.duration_in_beats
    }

    /// Get the note name (e.g., "C4", "A#5")
    pub fn note_name(&self) -> String {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        let octave = (self.pitch / 12) as i32 - 1;
        format!("{}{}", NOTE_NAMES[(self.pitch % 12) as usize], octave)
    }
}

/// Notes played on one Midi channel, sorted by position
#[derive(Debug, Clone, PartialEq)]
pub struct Phrase {
    channel: u8,
    notes: Vec<NoteEvent>,
}

impl Phrase {
    pub fn new(channel: u8) -> Self {
        assert!(channel < 16, "MIDI channel must be 0-15");
        Self {
            channel,
            notes: Vec::new(),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn add(&mut self, note: NoteEvent) {
        let index = self
            .notes
            .partition_point(|n| n.position_in_beats <= note.position_in_beats);
        self.notes.insert(index, note);
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Position of the end of the last note
    pub fn end_in_beats(&self) -> f32 {
        self.notes.iter().map(NoteEvent::end_in_beats).fold(0.0, f32::max)
    }

    /// Add note on/off events to `track`, shifted by `tick_offset`
    pub fn fill_track(&self, track: &mut Track, tick_offset: u64) {
        for note in &self.notes {
            let on = ShortMessage::note_on(self.channel, note.pitch, note.velocity);
            let off = ShortMessage::note_off(self.channel, note.pitch);
            match (on, off) {
                (Ok(on), Ok(off)) => {
                    let start = tick_offset + beats_to_ticks(note.position_in_beats);
                    let end = (tick_offset + beats_to_ticks(note.end_in_beats())).max(start + 1);
                    track.add(MidiEvent::short(start, on));
                    track.add(MidiEvent::short(end, off));
                }
                (Err(e), _) | (_, Err(e)) => error!("Invalid phrase note {}: {}", note.note_name(), e),
            }
        }
    }
}

/// Generated phrases by instrument name
pub type PhraseMap = BTreeMap<String, Phrase>;
