// Metronome - Click and precount track synthesis
// Clicks are plain note events on the click channel, one per natural beat

use crate::midi::event::ShortMessage;
use crate::midi::meta::MetaMessage;
use crate::sequencer::sequence::{MidiEvent, Sequence, Track};
use crate::sequencer::timeline::{TICKS_PER_BEAT, TimeSignature};
use crate::song::SongContext;
use tracing::{debug, error};

pub const CLICK_TRACK_NAME: &str = "JJazzClickTrack";
pub const PRECOUNT_TRACK_NAME: &str = "JJazzPreCountTrack";

/// Click note length
const CLICK_DURATION_TICKS: u64 = TICKS_PER_BEAT / 4;

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    /// Click on first beat of bar (accent/downbeat)
    Accent,
    /// Click on other beats
    Regular,
}

/// Number of precount bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum PrecountMode {
    OneBar,
    TwoBars,
    /// Depends on tempo and time signature
    #[default]
    Auto,
}

impl PrecountMode {
    /// Number of precount bars for the given meter and tempo
    pub fn bar_count(&self, time_signature: TimeSignature, tempo_bpm: f32) -> u32 {
        match self {
            PrecountMode::OneBar => 1,
            PrecountMode::TwoBars => 2,
            PrecountMode::Auto => {
                let threshold = match time_signature.numerator {
                    0..=3 => 55.0,
                    4 => 100.0,
                    _ => 120.0,
                };
                if tempo_bpm > threshold { 2 } else { 1 }
            }
        }
    }
}

/// Click pitches, velocities and channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickSound {
    pub channel: u8,
    pub pitch_high: u8,
    pub velocity_high: u8,
    pub pitch_low: u8,
    pub velocity_low: u8,
}

impl ClickSound {
    fn pitch_velocity(&self, click_type: ClickType) -> (u8, u8) {
        match click_type {
            ClickType::Accent => (self.pitch_high, self.velocity_high),
            ClickType::Regular => (self.pitch_low, self.velocity_low),
        }
    }

    /// Add a click note at `tick`. Invalid data is logged and the click skipped.
    fn add_click(&self, track: &mut Track, tick: u64, click_type: ClickType) {
        let (pitch, velocity) = self.pitch_velocity(click_type);
        let on = ShortMessage::note_on(self.channel, pitch, velocity);
        let off = ShortMessage::note_off(self.channel, pitch);
        match (on, off) {
            (Ok(on), Ok(off)) => {
                track.add(MidiEvent::short(tick, on));
                track.add(MidiEvent::short(tick + CLICK_DURATION_TICKS, off));
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Invalid click note at tick {}: {}", tick, e);
            }
        }
    }
}

impl Default for ClickSound {
    fn default() -> Self {
        Self {
            channel: 9,
            pitch_high: 34,
            velocity_high: 110,
            pitch_low: 33,
            velocity_low: 80,
        }
    }
}

/// Append a click track: one click per natural beat of every song part in the
/// context, accent on the first beat of each bar. Returns the new track index.
pub fn add_click_track(sequence: &mut Sequence, context: &SongContext, sound: &ClickSound) -> usize {
    let mut track = Track::new();
    track.add(MidiEvent::meta(0, MetaMessage::track_name(CLICK_TRACK_NAME)));

    let mut tick = 0u64;
    for part in context.song_parts() {
        let Some(range) = context.part_bar_range(part) else {
            continue;
        };
        for _bar in range.from..=range.to {
            for beat in 0..part.time_signature.natural_beats() {
                let click_type = if beat == 0 {
                    ClickType::Accent
                } else {
                    ClickType::Regular
                };
                sound.add_click(&mut track, tick, click_type);
                tick += TICKS_PER_BEAT;
            }
        }
    }

    let index = sequence.create_track();
    if let Some(slot) = sequence.track_mut(index) {
        *slot = track;
    }
    index
}

/// Shift all existing events by the precount length (tick-0 track name, time
/// signature, tempo and copyright events stay in place), then add a precount click
/// track at the start.
///
/// Returns the tick at which the song now starts.
pub fn add_precount_click_track(
    sequence: &mut Sequence,
    context: &SongContext,
    sound: &ClickSound,
    mode: PrecountMode,
) -> u64 {
    let Some(first_part) = context.song_parts().next() else {
        return 0;
    };
    let time_signature = first_part.time_signature;
    let tempo = context.tempo().bpm() * first_part.tempo_factor;
    let nb_bars = mode.bar_count(time_signature, tempo);
    let song_start_tick = nb_bars as u64 * time_signature.bar_ticks();

    for track in sequence.tracks_mut() {
        track.shift(song_start_tick);
    }

    let mut track = Track::new();
    track.add(MidiEvent::meta(0, MetaMessage::track_name(PRECOUNT_TRACK_NAME)));
    let mut tick = 0u64;
    for _bar in 0..nb_bars {
        for beat in 0..time_signature.natural_beats() {
            let click_type = if beat == 0 {
                ClickType::Accent
            } else {
                ClickType::Regular
            };
            sound.add_click(&mut track, tick, click_type);
            tick += TICKS_PER_BEAT;
        }
    }
    let index = sequence.create_track();
    if let Some(slot) = sequence.track_mut(index) {
        *slot = track;
    }

    debug!(
        "Precount: {} bar(s) of {} at {:.1} BPM, song starts at tick {}",
        nb_bars, time_signature, tempo, song_start_tick
    );
    song_start_tick
}
