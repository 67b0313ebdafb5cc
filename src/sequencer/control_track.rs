// Control track - synchronization markers embedded in the played sequence
//
// One position marker per natural beat and one marker per chord symbol. The
// controller maps the markers it receives back to song positions and chord
// symbols through the ControlTrack which created them.

use crate::midi::meta::{MarkerId, META_BEAT_POSITION, META_CHORD_SYMBOL, MetaMessage};
use crate::sequencer::sequence::{MidiEvent, Track};
use crate::sequencer::timeline::{Position, TICKS_PER_BEAT};
use crate::song::{ChordSymbolItem, SongContext};
use std::collections::HashMap;

pub const CONTROL_TRACK_NAME: &str = "JJazzControlTrack";

#[derive(Debug, Clone, Copy)]
struct BeatMarker {
    position: Position,
    position_in_beats: f32,
}

#[derive(Debug, Clone)]
pub struct ControlTrack {
    track_id: usize,
    events: Vec<MidiEvent>,
    positions: HashMap<MarkerId, BeatMarker>,
    chord_symbols: HashMap<MarkerId, ChordSymbolItem>,
}

impl ControlTrack {
    /// Build the markers for `context`. `track_id` is the index of the sequence
    /// track which will receive them.
    pub fn new(context: &SongContext, track_id: usize) -> Self {
        let mut events = Vec::new();
        let mut positions = HashMap::new();
        let mut chord_symbols = HashMap::new();

        // Natural beats
        let mut tick = 0u64;
        for part in context.song_parts() {
            let Some(range) = context.part_bar_range(part) else {
                continue;
            };
            let nb_beats = part.time_signature.natural_beats();
            for bar in range.from..=range.to {
                for beat in 0..nb_beats {
                    let marker = MetaMessage::marker(META_BEAT_POSITION);
                    if let Some(id) = marker.marker_id() {
                        positions.insert(
                            id,
                            BeatMarker {
                                position: Position::new(bar, beat as f32),
                                position_in_beats: (tick as f64 / TICKS_PER_BEAT as f64) as f32,
                            },
                        );
                    }
                    events.push(MidiEvent::meta(tick, marker));
                    tick += TICKS_PER_BEAT;
                }
            }
        }

        // Chord symbols
        for chord in context.chord_symbols() {
            let Some(mut chord_tick) = context.relative_tick(chord.position) else {
                continue;
            };
            if chord_tick == 0 {
                // Some transports don't fire a meta event scheduled exactly at playback start
                chord_tick = 1;
            }
            let marker = MetaMessage::marker(META_CHORD_SYMBOL);
            if let Some(id) = marker.marker_id() {
                chord_symbols.insert(id, chord);
            }
            events.push(MidiEvent::meta(chord_tick, marker));
        }

        Self {
            track_id,
            events,
            positions,
            chord_symbols,
        }
    }

    /// Index of the sequence track holding the markers
    pub fn track_id(&self) -> usize {
        self.track_id
    }

    /// All markers (position markers first, then chord markers; not tick sorted)
    pub fn midi_events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Add the track name and all markers to `track`
    pub fn fill_track(&self, track: &mut Track) {
        track.add(MidiEvent::meta(0, MetaMessage::track_name(CONTROL_TRACK_NAME)));
        for event in &self.events {
            track.add(event.clone());
        }
    }

    /// Chord symbol of a chord marker created by this control track
    pub fn chord_symbol(&self, marker: &MetaMessage) -> Option<&ChordSymbolItem> {
        marker.marker_id().and_then(|id| self.chord_symbols.get(&id))
    }

    /// Position of a beat marker created by this control track
    pub fn position(&self, marker: &MetaMessage) -> Option<Position> {
        marker
            .marker_id()
            .and_then(|id| self.positions.get(&id))
            .map(|m| m.position)
    }

    /// Natural beats from the start of the context for a beat marker
    pub fn position_in_beats(&self, marker: &MetaMessage) -> Option<f32> {
        marker
            .marker_id()
            .and_then(|id| self.positions.get(&id))
            .map(|m| m.position_in_beats)
    }

    pub fn nb_position_markers(&self) -> usize {
        self.positions.len()
    }

    pub fn nb_chord_markers(&self) -> usize {
        self.chord_symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::timeline::{Tempo, TimeSignature};
    use crate::song::{BarRange, Song};
    use std::sync::Arc;

    fn context(bar_range: Option<BarRange>) -> SongContext {
        let mut song = Song::new("Blues", Tempo::new(140.0));
        song.add_part("A", 8, TimeSignature::four_four());
        song.add_part("B", 2, TimeSignature::three_four());
        song.add_chord("C7", Position::new(0, 0.0));
        song.add_chord("F7", Position::new(1, 2.0));
        song.add_chord("G7", Position::new(8, 1.0));
        SongContext::new(Arc::new(song), bar_range).unwrap()
    }

    fn meta(event: &MidiEvent) -> &MetaMessage {
        event.message.as_meta().unwrap()
    }

    #[test]
    fn test_one_position_marker_per_beat() {
        let ct = ControlTrack::new(&context(BarRange::new(0, 7)), 3);
        assert_eq!(ct.nb_position_markers(), 8 * 4);
        assert_eq!(ct.track_id(), 3);

        for event in ct.midi_events() {
            let meta = meta(event);
            if meta.meta_type() != META_BEAT_POSITION {
                continue;
            }
            let pos = ct.position(meta).unwrap();
            let expected_tick = (pos.bar as u64 * 4 + pos.beat as u64) * TICKS_PER_BEAT;
            assert_eq!(event.tick, expected_tick);
            assert_eq!(
                ct.position_in_beats(meta).unwrap(),
                (pos.bar * 4) as f32 + pos.beat
            );
        }
    }

    #[test]
    fn test_mixed_time_signatures() {
        let ct = ControlTrack::new(&context(None), 0);
        assert_eq!(ct.nb_position_markers(), 8 * 4 + 2 * 3);
        let last = ct
            .midi_events()
            .iter()
            .filter(|e| meta(e).meta_type() == META_BEAT_POSITION)
            .last()
            .unwrap();
        assert_eq!(ct.position(meta(last)), Some(Position::new(9, 2.0)));
    }

    #[test]
    fn test_chord_markers() {
        let ct = ControlTrack::new(&context(None), 0);
        assert_eq!(ct.nb_chord_markers(), 3);

        let chords: Vec<(u64, String)> = ct
            .midi_events()
            .iter()
            .filter_map(|e| ct.chord_symbol(meta(e)).map(|c| (e.tick, c.name.clone())))
            .collect();
        assert_eq!(chords[0], (1, "C7".to_string())); // tick 0 moved to 1
        assert_eq!(chords[1], (4 * TICKS_PER_BEAT + 2 * TICKS_PER_BEAT, "F7".to_string()));
        assert_eq!(chords[2], (32 * TICKS_PER_BEAT + TICKS_PER_BEAT, "G7".to_string()));
    }

    #[test]
    fn test_sub_range_starts_with_sounding_chord() {
        let ct = ControlTrack::new(&context(BarRange::new(2, 7)), 0);
        assert_eq!(ct.nb_chord_markers(), 1);
        let first = ct
            .midi_events()
            .iter()
            .find_map(|e| ct.chord_symbol(meta(e)).map(|c| (e.tick, c.name.clone())));
        assert_eq!(first, Some((1, "F7".to_string())));
    }

    #[test]
    fn test_foreign_markers_are_not_resolved() {
        let ct1 = ControlTrack::new(&context(None), 0);
        let ct2 = ControlTrack::new(&context(None), 0);
        let marker = meta(&ct2.midi_events()[0]);
        assert!(ct2.position(marker).is_some());
        assert!(ct1.position(marker).is_none());
        assert!(ct1.chord_symbol(marker).is_none());
    }

    #[test]
    fn test_fill_track_sorts_markers() {
        let ct = ControlTrack::new(&context(None), 0);
        let mut track = Track::new();
        ct.fill_track(&mut track);
        assert_eq!(track.len(), ct.midi_events().len() + 1);
        assert_eq!(track.name().as_deref(), Some(CONTROL_TRACK_NAME));
        assert!(track.events().windows(2).all(|w| w[0].tick <= w[1].tick));
    }
}
