// Sequence - Timed MIDI events organized in tracks

use crate::midi::event::ShortMessage;
use crate::midi::meta::{MetaMessage, TICK_ZERO_PINNED_TYPES};
use crate::sequencer::timeline::TICKS_PER_BEAT;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    Short(ShortMessage),
    Meta(MetaMessage),
}

impl MidiMessage {
    pub fn as_meta(&self) -> Option<&MetaMessage> {
        match self {
            MidiMessage::Meta(meta) => Some(meta),
            MidiMessage::Short(_) => None,
        }
    }

    pub fn as_short(&self) -> Option<&ShortMessage> {
        match self {
            MidiMessage::Short(msg) => Some(msg),
            MidiMessage::Meta(_) => None,
        }
    }
}

/// A message scheduled at an absolute tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    pub tick: u64,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn short(tick: u64, msg: ShortMessage) -> Self {
        Self {
            tick,
            message: MidiMessage::Short(msg),
        }
    }

    pub fn meta(tick: u64, meta: MetaMessage) -> Self {
        Self {
            tick,
            message: MidiMessage::Meta(meta),
        }
    }

    /// True for the standard meta events which must stay at tick 0
    pub fn is_tick_zero_pinned(&self) -> bool {
        self.tick == 0
            && self
                .message
                .as_meta()
                .is_some_and(|m| TICK_ZERO_PINNED_TYPES.contains(&m.meta_type()))
    }
}

/// Tick-ordered list of events
///
/// Events added at an already used tick go after the existing ones, so insertion
/// order is preserved for same-tick events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    events: Vec<MidiEvent>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: MidiEvent) {
        let index = self.events.partition_point(|e| e.tick <= event.tick);
        self.events.insert(index, event);
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Tick of the last event
    pub fn tick_length(&self) -> u64 {
        self.events.last().map(|e| e.tick).unwrap_or(0)
    }

    /// Name from the first track name meta event
    pub fn name(&self) -> Option<String> {
        self.events
            .iter()
            .filter_map(|e| e.message.as_meta())
            .find(|m| m.meta_type() == crate::midi::meta::META_TRACK_NAME)
            .and_then(|m| m.text())
    }

    /// Move every event `offset` ticks later, except the tick-0 pinned meta events.
    ///
    /// Relative order is preserved: pinned events stay first at tick 0, the others
    /// keep their original order.
    pub fn shift(&mut self, offset: u64) {
        if offset == 0 {
            return;
        }
        let (pinned, mut moved): (Vec<MidiEvent>, Vec<MidiEvent>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|e| e.is_tick_zero_pinned());
        for event in &mut moved {
            event.tick += offset;
        }
        self.events = pinned;
        self.events.append(&mut moved);
    }
}

/// Multi-track sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    resolution: u64,
    tracks: Vec<Track>,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            resolution: TICKS_PER_BEAT,
            tracks: Vec::new(),
        }
    }

    /// Ticks per natural beat
    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    /// Append an empty track, returns its index
    pub fn create_track(&mut self) -> usize {
        self.tracks.push(Track::new());
        self.tracks.len() - 1
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }

    /// Tick of the last event of all tracks
    pub fn tick_length(&self) -> u64 {
        self.tracks.iter().map(Track::tick_length).max().unwrap_or(0)
    }

    /// Human readable dump, used for debugging played sequences
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Sequence: resolution={} tracks={} length={}",
            self.resolution,
            self.tracks.len(),
            self.tick_length()
        );
        for (index, track) in self.tracks.iter().enumerate() {
            let _ = writeln!(
                out,
                "  Track {} '{}' ({} events)",
                index,
                track.name().unwrap_or_default(),
                track.len()
            );
            for event in track.events() {
                match &event.message {
                    MidiMessage::Short(msg) => {
                        let _ = writeln!(out, "    {:>8} {:02X?}", event.tick, msg.to_bytes());
                    }
                    MidiMessage::Meta(meta) => {
                        let _ = writeln!(
                            out,
                            "    {:>8} meta 0x{:02X} {:02X?}",
                            event.tick,
                            meta.meta_type(),
                            meta.data()
                        );
                    }
                }
            }
        }
        out
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}
