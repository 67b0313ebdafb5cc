// Transport - Playback engine abstraction and the software sequencer
//
// The playback thread advances a tick clock from wall time:
//   ticks/s = tempo_bpm * tempo_factor / 60 * resolution
// Events are emitted outside of the state lock.

use crate::listeners::{ListenerId, ListenerList};
use crate::midi::event::ShortMessage;
use crate::midi::meta::MetaMessage;
use crate::midi::output::MidiSink;
use crate::sequencer::player::{DueEvent, LOOP_CONTINUOUSLY, LoopSettings, SequencePlayer};
use crate::sequencer::sequence::{MidiMessage, Sequence};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Callback for meta events reached by the transport
pub type MetaListener = dyn Fn(&MetaMessage) + Send + Sync;

/// Callback for short messages sent by the transport
pub type ShortReceiver = dyn Fn(&ShortMessage) + Send + Sync;

/// Loop end point meaning "end of the sequence"
pub const LOOP_END_OF_SEQUENCE: i64 = -1;

const PLAYBACK_PERIOD: Duration = Duration::from_millis(2);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("No sequence loaded")]
    NoSequence,

    #[error("Invalid loop points: start={start} end={end}")]
    InvalidLoopPoints { start: u64, end: i64 },

    #[error("Invalid loop count: {0}")]
    InvalidLoopCount(i32),

    #[error("Midi device error: {0}")]
    Device(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Real-time scheduler playing a sequence.
///
/// Meta listeners and receivers are called on the transport's own thread.
pub trait SequencerPort: Send + Sync {
    fn set_sequence(&self, sequence: Option<Arc<Sequence>>) -> Result<(), TransportError>;
    fn sequence(&self) -> Option<Arc<Sequence>>;

    fn start(&self) -> Result<(), TransportError>;
    fn stop(&self);
    fn is_running(&self) -> bool;

    fn set_tick_position(&self, tick: u64);
    fn tick_position(&self) -> u64;

    fn set_tempo_in_bpm(&self, bpm: f32);
    fn tempo_in_bpm(&self) -> f32;
    fn set_tempo_factor(&self, factor: f32);
    fn tempo_factor(&self) -> f32;

    fn set_loop_start_point(&self, tick: u64) -> Result<(), TransportError>;
    fn loop_start_point(&self) -> u64;
    /// LOOP_END_OF_SEQUENCE means end of the sequence
    fn set_loop_end_point(&self, tick: i64) -> Result<(), TransportError>;
    fn loop_end_point(&self) -> i64;
    fn set_loop_count(&self, count: i32) -> Result<(), TransportError>;
    fn loop_count(&self) -> i32;

    fn set_track_mute(&self, track: usize, mute: bool);
    fn track_mute(&self, track: usize) -> bool;

    fn add_meta_listener(&self, listener: Arc<MetaListener>) -> ListenerId;
    fn remove_meta_listener(&self, id: ListenerId) -> bool;
    fn add_receiver(&self, receiver: Arc<ShortReceiver>) -> ListenerId;
    fn remove_receiver(&self, id: ListenerId) -> bool;
}

struct PlayState {
    player: SequencePlayer,
    running: bool,
    shutdown: bool,
    last_instant: Option<Instant>,
    bpm: f32,
    factor: f32,
    loop_start: u64,
    loop_end: i64,
    loop_count: i32,
    muted: HashSet<usize>,
}

impl PlayState {
    fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            start: self.loop_start,
            end: u64::try_from(self.loop_end).ok(),
            count: self.loop_count,
        }
    }

    fn ticks_per_second(&self, resolution: u64) -> f64 {
        self.bpm as f64 * self.factor as f64 / 60.0 * resolution as f64
    }
}

struct Shared {
    state: Mutex<PlayState>,
    wakeup: Condvar,
    meta_listeners: ListenerList<MetaListener>,
    receivers: ListenerList<ShortReceiver>,
    sink: Mutex<Option<Arc<dyn MidiSink>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit_short(&self, msg: &ShortMessage) {
        self.receivers.for_each(|r| r(msg));
        let sink = self.sink.lock().ok().and_then(|s| s.clone());
        if let Some(sink) = sink {
            if let Err(e) = sink.send(msg) {
                warn!("Failed to send Midi message: {}", e);
            }
        }
    }

    fn emit_meta(&self, meta: &MetaMessage) {
        self.meta_listeners.for_each(|l| l(meta));
    }

    fn run(&self) {
        loop {
            let (events, finished) = {
                let mut state = self.lock();
                while !state.running && !state.shutdown {
                    state = match self.wakeup.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                if state.shutdown {
                    break;
                }

                let now = Instant::now();
                let elapsed = state
                    .last_instant
                    .map(|last| now.duration_since(last))
                    .unwrap_or_default();
                state.last_instant = Some(now);

                let resolution = state.player.sequence().map(|s| s.resolution()).unwrap_or(1);
                let delta = elapsed.as_secs_f64() * state.ticks_per_second(resolution);
                let settings = state.loop_settings();
                let muted = state.muted.clone();
                let advance = state.player.advance(delta, &settings, &muted);
                let mut events = advance.events;
                if advance.finished {
                    state.running = false;
                    state.last_instant = None;
                    // Release hanging notes
                    for off in state.player.stop_all_notes() {
                        events.push(DueEvent {
                            track: 0,
                            tick: state.player.tick(),
                            message: MidiMessage::Short(off),
                        });
                    }
                }
                (events, advance.finished)
            };

            for event in &events {
                match &event.message {
                    MidiMessage::Short(msg) => self.emit_short(msg),
                    MidiMessage::Meta(meta) => self.emit_meta(meta),
                }
            }
            if finished {
                debug!("End of sequence reached");
                self.emit_meta(&MetaMessage::end_of_track());
                continue;
            }

            let state = self.lock();
            if state.running && !state.shutdown {
                let _ = self.wakeup.wait_timeout(state, PLAYBACK_PERIOD);
            }
        }
    }
}

/// Software sequencer with its own playback thread
pub struct SoftSequencer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SoftSequencer {
    pub fn new() -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PlayState {
                player: SequencePlayer::new(),
                running: false,
                shutdown: false,
                last_instant: None,
                bpm: 120.0,
                factor: 1.0,
                loop_start: 0,
                loop_end: LOOP_END_OF_SEQUENCE,
                loop_count: 0,
                muted: HashSet::new(),
            }),
            wakeup: Condvar::new(),
            meta_listeners: ListenerList::new(),
            receivers: ListenerList::new(),
            sink: Mutex::new(None),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("soft-sequencer".to_string())
            .spawn(move || thread_shared.run())
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Route played short messages to `sink` (None to disconnect)
    pub fn set_sink(&self, sink: Option<Arc<dyn MidiSink>>) {
        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = sink;
        }
    }

    fn release_notes(&self, offs: Vec<ShortMessage>) {
        for off in &offs {
            self.shared.emit_short(off);
        }
    }
}

impl SequencerPort for SoftSequencer {
    fn set_sequence(&self, sequence: Option<Arc<Sequence>>) -> Result<(), TransportError> {
        let offs = {
            let mut state = self.shared.lock();
            let offs = state.player.stop_all_notes();
            if sequence.is_none() {
                state.running = false;
                state.last_instant = None;
            }
            state.player.set_sequence(sequence);
            offs
        };
        self.release_notes(offs);
        Ok(())
    }

    fn sequence(&self) -> Option<Arc<Sequence>> {
        self.shared.lock().player.sequence().cloned()
    }

    fn start(&self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.player.sequence().is_none() {
            return Err(TransportError::NoSequence);
        }
        if !state.running {
            state.running = true;
            state.last_instant = Some(Instant::now());
            self.shared.wakeup.notify_all();
        }
        Ok(())
    }

    fn stop(&self) {
        let offs = {
            let mut state = self.shared.lock();
            state.running = false;
            state.last_instant = None;
            state.player.stop_all_notes()
        };
        self.release_notes(offs);
    }

    fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    fn set_tick_position(&self, tick: u64) {
        let offs = {
            let mut state = self.shared.lock();
            let offs = state.player.stop_all_notes();
            state.player.seek(tick);
            offs
        };
        self.release_notes(offs);
    }

    fn tick_position(&self) -> u64 {
        self.shared.lock().player.tick()
    }

    fn set_tempo_in_bpm(&self, bpm: f32) {
        if bpm > 0.0 {
            self.shared.lock().bpm = bpm;
        } else {
            error!("Ignored invalid transport tempo {}", bpm);
        }
    }

    fn tempo_in_bpm(&self) -> f32 {
        self.shared.lock().bpm
    }

    fn set_tempo_factor(&self, factor: f32) {
        if factor > 0.0 {
            self.shared.lock().factor = factor;
        } else {
            error!("Ignored invalid tempo factor {}", factor);
        }
    }

    fn tempo_factor(&self) -> f32 {
        self.shared.lock().factor
    }

    fn set_loop_start_point(&self, tick: u64) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.loop_end != LOOP_END_OF_SEQUENCE && tick as i64 > state.loop_end {
            return Err(TransportError::InvalidLoopPoints {
                start: tick,
                end: state.loop_end,
            });
        }
        state.loop_start = tick;
        Ok(())
    }

    fn loop_start_point(&self) -> u64 {
        self.shared.lock().loop_start
    }

    fn set_loop_end_point(&self, tick: i64) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if tick < LOOP_END_OF_SEQUENCE || (tick != LOOP_END_OF_SEQUENCE && tick < state.loop_start as i64) {
            return Err(TransportError::InvalidLoopPoints {
                start: state.loop_start,
                end: tick,
            });
        }
        state.loop_end = tick;
        Ok(())
    }

    fn loop_end_point(&self) -> i64 {
        self.shared.lock().loop_end
    }

    fn set_loop_count(&self, count: i32) -> Result<(), TransportError> {
        if count < LOOP_CONTINUOUSLY {
            return Err(TransportError::InvalidLoopCount(count));
        }
        self.shared.lock().loop_count = count;
        Ok(())
    }

    fn loop_count(&self) -> i32 {
        self.shared.lock().loop_count
    }

    fn set_track_mute(&self, track: usize, mute: bool) {
        let mut state = self.shared.lock();
        if mute {
            state.muted.insert(track);
        } else {
            state.muted.remove(&track);
        }
    }

    fn track_mute(&self, track: usize) -> bool {
        self.shared.lock().muted.contains(&track)
    }

    fn add_meta_listener(&self, listener: Arc<MetaListener>) -> ListenerId {
        self.shared.meta_listeners.add(listener)
    }

    fn remove_meta_listener(&self, id: ListenerId) -> bool {
        self.shared.meta_listeners.remove(id)
    }

    fn add_receiver(&self, receiver: Arc<ShortReceiver>) -> ListenerId {
        self.shared.receivers.add(receiver)
    }

    fn remove_receiver(&self, id: ListenerId) -> bool {
        self.shared.receivers.remove(id)
    }
}

impl Drop for SoftSequencer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.thread.lock().ok().and_then(|mut t| t.take()) {
            if handle.join().is_err() {
                error!("Soft sequencer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::meta::{META_END_OF_TRACK, META_TRACK_NAME};
    use crate::sequencer::sequence::MidiEvent;
    use std::sync::mpsc;

    fn short_sequence() -> Arc<Sequence> {
        let mut seq = Sequence::new();
        let t = seq.create_track();
        let track = seq.track_mut(t).unwrap();
        track.add(MidiEvent::meta(0, MetaMessage::track_name("Test")));
        track.add(MidiEvent::short(0, ShortMessage::note_on(0, 60, 100).unwrap()));
        track.add(MidiEvent::short(96, ShortMessage::note_off(0, 60).unwrap()));
        Arc::new(seq)
    }

    #[test]
    fn test_start_without_sequence_fails() {
        let seq = SoftSequencer::new().unwrap();
        assert_eq!(seq.start(), Err(TransportError::NoSequence));
        assert!(!seq.is_running());
    }

    #[test]
    fn test_plays_to_end_of_sequence() {
        let sequencer = SoftSequencer::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let meta_tx = tx.clone();
        sequencer.add_meta_listener(Arc::new(move |m: &MetaMessage| {
            let _ = meta_tx.send(format!("meta:{:02X}", m.meta_type()));
        }));
        sequencer.add_receiver(Arc::new(move |m: &ShortMessage| {
            let _ = tx.send(format!("short:{:02X}", m.command()));
        }));

        sequencer.set_sequence(Some(short_sequence())).unwrap();
        // 96 ticks at 120 BPM x 4 is about 12ms
        sequencer.set_tempo_factor(4.0);
        sequencer.start().unwrap();

        let mut received = Vec::new();
        while let Ok(msg) = rx.recv_timeout(Duration::from_secs(2)) {
            let end = msg == format!("meta:{:02X}", META_END_OF_TRACK);
            received.push(msg);
            if end {
                break;
            }
        }
        assert_eq!(received.first().cloned(), Some(format!("meta:{:02X}", META_TRACK_NAME)));
        assert!(received.contains(&"short:90".to_string()));
        assert!(received.contains(&"short:80".to_string()));
        assert_eq!(received.last().cloned(), Some(format!("meta:{:02X}", META_END_OF_TRACK)));
        assert!(!sequencer.is_running());
    }

    #[test]
    fn test_loop_points_validation() {
        let sequencer = SoftSequencer::new().unwrap();
        sequencer.set_loop_start_point(100).unwrap();
        assert!(sequencer.set_loop_end_point(50).is_err());
        sequencer.set_loop_end_point(200).unwrap();
        assert!(sequencer.set_loop_start_point(300).is_err());
        sequencer.set_loop_end_point(LOOP_END_OF_SEQUENCE).unwrap();
        assert!(sequencer.set_loop_count(-2).is_err());
        sequencer.set_loop_count(LOOP_CONTINUOUSLY).unwrap();
        assert_eq!(sequencer.loop_count(), LOOP_CONTINUOUSLY);
    }

    #[test]
    fn test_track_mute_and_position() {
        let sequencer = SoftSequencer::new().unwrap();
        sequencer.set_sequence(Some(short_sequence())).unwrap();
        sequencer.set_track_mute(0, true);
        assert!(sequencer.track_mute(0));
        sequencer.set_track_mute(0, false);
        assert!(!sequencer.track_mute(0));

        sequencer.set_tick_position(48);
        assert_eq!(sequencer.tick_position(), 48);
    }
}
