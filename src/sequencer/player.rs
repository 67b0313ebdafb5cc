// Sequence Player - Walks a sequence and collects the events due in a tick window
// Used by the soft sequencer playback thread

use crate::midi::event::{ChannelEvent, ShortMessage};
use crate::sequencer::sequence::{MidiMessage, Sequence};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Loop count meaning "loop until stopped"
pub const LOOP_CONTINUOUSLY: i32 = -1;

/// Loop region and count, in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub start: u64,
    /// None = end of the sequence
    pub end: Option<u64>,
    /// 0 = no loop, LOOP_CONTINUOUSLY = until stopped
    pub count: i32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            count: 0,
        }
    }
}

/// An event ready to be emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEvent {
    pub track: usize,
    pub tick: u64,
    pub message: MidiMessage,
}

/// Result of one advance() call
#[derive(Debug, Default)]
pub struct Advance {
    pub events: Vec<DueEvent>,
    /// True when the last event of the sequence has been emitted and no loop remains
    pub finished: bool,
}

/// Sequence player - converts the tick clock into due events
pub struct SequencePlayer {
    sequence: Option<Arc<Sequence>>,
    /// Per track index of the next event to emit
    cursors: Vec<usize>,
    /// Fractional tick position
    position: f64,
    /// Loops already performed since the last seek from outside
    loops_done: i32,
    /// Sounding notes (channel, pitch), released on stop
    active_notes: BTreeSet<(u8, u8)>,
}

impl SequencePlayer {
    pub fn new() -> Self {
        Self {
            sequence: None,
            cursors: Vec::new(),
            position: 0.0,
            loops_done: 0,
            active_notes: BTreeSet::new(),
        }
    }

    pub fn set_sequence(&mut self, sequence: Option<Arc<Sequence>>) {
        self.sequence = sequence;
        self.seek(0);
    }

    pub fn sequence(&self) -> Option<&Arc<Sequence>> {
        self.sequence.as_ref()
    }

    /// Current position in whole ticks
    pub fn tick(&self) -> u64 {
        self.position as u64
    }

    /// Move to `tick`, the next emitted events are the ones at or after `tick`
    pub fn seek(&mut self, tick: u64) {
        self.position = tick as f64;
        self.loops_done = 0;
        self.reposition_cursors(tick);
    }

    fn reposition_cursors(&mut self, tick: u64) {
        self.cursors = match &self.sequence {
            Some(seq) => seq
                .tracks()
                .iter()
                .map(|t| t.events().partition_point(|e| e.tick < tick))
                .collect(),
            None => Vec::new(),
        };
    }

    /// Tick one past the last tick of the sequence
    fn sequence_end(&self) -> u64 {
        self.sequence.as_ref().map(|s| s.tick_length() + 1).unwrap_or(0)
    }

    fn loop_active(&self, settings: &LoopSettings) -> bool {
        settings.count == LOOP_CONTINUOUSLY || self.loops_done < settings.count
    }

    /// Advance the clock by `delta_ticks` and return the events in the crossed window.
    ///
    /// Short messages of muted tracks are dropped, meta events are always returned.
    pub fn advance(&mut self, delta_ticks: f64, settings: &LoopSettings, muted: &HashSet<usize>) -> Advance {
        let mut advance = Advance::default();
        if self.sequence.is_none() {
            advance.finished = true;
            return advance;
        }

        let mut target = self.position + delta_ticks.max(0.0);
        let seq_end = self.sequence_end();
        loop {
            let loop_end = settings.end.unwrap_or(seq_end).min(seq_end);
            let can_loop = self.loop_active(settings) && loop_end > settings.start;
            if can_loop && self.position < loop_end as f64 && target >= loop_end as f64 {
                self.collect_until(loop_end as f64, muted, &mut advance.events);
                self.loops_done += 1;
                let overflow = target - loop_end as f64;
                self.position = settings.start as f64;
                self.reposition_cursors(settings.start);
                target = self.position + overflow.min((loop_end - settings.start) as f64);
                continue;
            }
            self.collect_until(target, muted, &mut advance.events);
            self.position = target;
            break;
        }

        advance.finished = self.is_exhausted();
        advance
    }

    fn is_exhausted(&self) -> bool {
        match &self.sequence {
            Some(seq) => seq
                .tracks()
                .iter()
                .zip(&self.cursors)
                .all(|(track, cursor)| *cursor >= track.len()),
            None => true,
        }
    }

    /// Collect events with tick < `until`, in tick order, track order for equal ticks
    fn collect_until(&mut self, until: f64, muted: &HashSet<usize>, out: &mut Vec<DueEvent>) {
        let Some(seq) = self.sequence.clone() else {
            return;
        };
        let start = out.len();
        for (index, track) in seq.tracks().iter().enumerate() {
            let Some(cursor) = self.cursors.get_mut(index) else {
                continue;
            };
            let events = track.events();
            while let Some(event) = events.get(*cursor) {
                if event.tick as f64 >= until {
                    break;
                }
                *cursor += 1;
                if matches!(event.message, MidiMessage::Short(_)) && muted.contains(&index) {
                    continue;
                }
                out.push(DueEvent {
                    track: index,
                    tick: event.tick,
                    message: event.message.clone(),
                });
            }
        }
        out[start..].sort_by_key(|e| (e.tick, e.track));
        for event in &out[start..] {
            if let MidiMessage::Short(msg) = &event.message {
                self.track_note(msg);
            }
        }
    }

    fn track_note(&mut self, msg: &ShortMessage) {
        match msg.kind() {
            ChannelEvent::NoteOn { channel, pitch, .. } => {
                self.active_notes.insert((channel, pitch));
            }
            ChannelEvent::NoteOff { channel, pitch } => {
                self.active_notes.remove(&(channel, pitch));
            }
            _ => {}
        }
    }

    /// Note-off messages for all currently sounding notes (called when transport stops)
    pub fn stop_all_notes(&mut self) -> Vec<ShortMessage> {
        std::mem::take(&mut self.active_notes)
            .into_iter()
            .filter_map(|(channel, pitch)| ShortMessage::note_off(channel, pitch).ok())
            .collect()
    }
}

impl Default for SequencePlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::meta::MetaMessage;
    use crate::sequencer::sequence::MidiEvent;

    fn sequence() -> Arc<Sequence> {
        let mut seq = Sequence::new();
        let t0 = seq.create_track();
        let t1 = seq.create_track();
        let track = seq.track_mut(t0).unwrap();
        track.add(MidiEvent::meta(0, MetaMessage::track_name("Song")));
        track.add(MidiEvent::short(0, ShortMessage::note_on(0, 60, 100).unwrap()));
        track.add(MidiEvent::short(480, ShortMessage::note_off(0, 60).unwrap()));
        let track = seq.track_mut(t1).unwrap();
        track.add(MidiEvent::short(0, ShortMessage::note_on(1, 40, 100).unwrap()));
        track.add(MidiEvent::short(960, ShortMessage::note_off(1, 40).unwrap()));
        Arc::new(seq)
    }

    fn ticks(advance: &Advance) -> Vec<u64> {
        advance.events.iter().map(|e| e.tick).collect()
    }

    #[test]
    fn test_advance_collects_window() {
        let mut player = SequencePlayer::new();
        player.set_sequence(Some(sequence()));
        let none = HashSet::new();

        let first = player.advance(100.0, &LoopSettings::default(), &none);
        assert_eq!(ticks(&first), vec![0, 0, 0]);
        assert!(!first.finished);

        let second = player.advance(300.0, &LoopSettings::default(), &none);
        assert!(second.events.is_empty());

        let third = player.advance(1000.0, &LoopSettings::default(), &none);
        assert_eq!(ticks(&third), vec![480, 960]);
        assert!(third.finished);
    }

    #[test]
    fn test_muted_track_keeps_meta_events() {
        let mut player = SequencePlayer::new();
        player.set_sequence(Some(sequence()));
        let muted: HashSet<usize> = [0].into_iter().collect();

        let adv = player.advance(2000.0, &LoopSettings::default(), &muted);
        assert_eq!(adv.events.iter().filter(|e| e.track == 0).count(), 1);
        assert!(adv.events[0].message.as_meta().is_some());
        assert_eq!(adv.events.iter().filter(|e| e.track == 1).count(), 2);
    }

    #[test]
    fn test_loop_count() {
        let mut player = SequencePlayer::new();
        player.set_sequence(Some(sequence()));
        let settings = LoopSettings {
            start: 0,
            end: Some(500),
            count: 2,
        };
        let none = HashSet::new();

        // Two loops of 500 ticks, then play through to the end
        let mut note_offs_at_480 = 0;
        let mut finished = false;
        for _ in 0..40 {
            let adv = player.advance(100.0, &settings, &none);
            note_offs_at_480 += adv.events.iter().filter(|e| e.tick == 480).count();
            if adv.finished {
                finished = true;
                break;
            }
        }
        assert!(finished);
        assert_eq!(note_offs_at_480, 3);
    }

    #[test]
    fn test_stop_all_notes() {
        let mut player = SequencePlayer::new();
        player.set_sequence(Some(sequence()));
        player.advance(10.0, &LoopSettings::default(), &HashSet::new());

        let offs = player.stop_all_notes();
        assert_eq!(offs.len(), 2);
        assert!(player.stop_all_notes().is_empty());
    }

    #[test]
    fn test_seek() {
        let mut player = SequencePlayer::new();
        player.set_sequence(Some(sequence()));
        player.seek(480);
        assert_eq!(player.tick(), 480);
        let adv = player.advance(1.0, &LoopSettings::default(), &HashSet::new());
        assert_eq!(ticks(&adv), vec![480]);
    }
}
