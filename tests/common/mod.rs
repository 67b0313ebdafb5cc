//! Shared fixtures for the integration tests: a recording transport, fake
//! generators and small helpers.

#![allow(dead_code)]

use jjazz_playback::error::GenerationError;
use jjazz_playback::generation::{MusicGenerator, NoteEvent, Phrase, PhraseMap};
use jjazz_playback::listeners::{ListenerId, ListenerList};
use jjazz_playback::midi::{MetaMessage, ShortMessage};
use jjazz_playback::sequencer::transport::{MetaListener, SequencerPort, ShortReceiver, TransportError};
use jjazz_playback::sequencer::{Sequence, Tempo, TimeSignature};
use jjazz_playback::song::{BarRange, Song, SongContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
pub struct TransportRecord {
    pub sequence: Option<Arc<Sequence>>,
    pub running: bool,
    pub tick: u64,
    pub bpm: f32,
    pub tempo_factor: f32,
    pub loop_start: u64,
    pub loop_end: i64,
    pub loop_count: i32,
    pub mutes: HashMap<usize, bool>,
    pub starts: usize,
    pub stops: usize,
}

/// SequencerPort which only records what it is asked to do
pub struct RecordingSequencer {
    record: Mutex<TransportRecord>,
    meta_listeners: ListenerList<MetaListener>,
    receivers: ListenerList<ShortReceiver>,
}

impl RecordingSequencer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(TransportRecord {
                loop_end: -1,
                tempo_factor: 1.0,
                ..Default::default()
            }),
            meta_listeners: ListenerList::new(),
            receivers: ListenerList::new(),
        })
    }

    pub fn record(&self) -> TransportRecord {
        self.record.lock().unwrap().clone()
    }

    /// Simulate the transport thread reaching a meta event
    pub fn fire_meta(&self, meta: &MetaMessage) {
        self.meta_listeners.for_each(|l| l(meta));
    }

    pub fn fire_short(&self, msg: &ShortMessage) {
        self.receivers.for_each(|r| r(msg));
    }

    pub fn nb_meta_listeners(&self) -> usize {
        self.meta_listeners.len()
    }

    pub fn nb_receivers(&self) -> usize {
        self.receivers.len()
    }
}

impl SequencerPort for RecordingSequencer {
    fn set_sequence(&self, sequence: Option<Arc<Sequence>>) -> Result<(), TransportError> {
        self.record.lock().unwrap().sequence = sequence;
        Ok(())
    }

    fn sequence(&self) -> Option<Arc<Sequence>> {
        self.record.lock().unwrap().sequence.clone()
    }

    fn start(&self) -> Result<(), TransportError> {
        let mut record = self.record.lock().unwrap();
        if record.sequence.is_none() {
            return Err(TransportError::NoSequence);
        }
        record.running = true;
        record.starts += 1;
        Ok(())
    }

    fn stop(&self) {
        let mut record = self.record.lock().unwrap();
        record.running = false;
        record.stops += 1;
    }

    fn is_running(&self) -> bool {
        self.record.lock().unwrap().running
    }

    fn set_tick_position(&self, tick: u64) {
        self.record.lock().unwrap().tick = tick;
    }

    fn tick_position(&self) -> u64 {
        self.record.lock().unwrap().tick
    }

    fn set_tempo_in_bpm(&self, bpm: f32) {
        self.record.lock().unwrap().bpm = bpm;
    }

    fn tempo_in_bpm(&self) -> f32 {
        self.record.lock().unwrap().bpm
    }

    fn set_tempo_factor(&self, factor: f32) {
        self.record.lock().unwrap().tempo_factor = factor;
    }

    fn tempo_factor(&self) -> f32 {
        self.record.lock().unwrap().tempo_factor
    }

    fn set_loop_start_point(&self, tick: u64) -> Result<(), TransportError> {
        self.record.lock().unwrap().loop_start = tick;
        Ok(())
    }

    fn loop_start_point(&self) -> u64 {
        self.record.lock().unwrap().loop_start
    }

    fn set_loop_end_point(&self, tick: i64) -> Result<(), TransportError> {
        self.record.lock().unwrap().loop_end = tick;
        Ok(())
    }

    fn loop_end_point(&self) -> i64 {
        self.record.lock().unwrap().loop_end
    }

    fn set_loop_count(&self, count: i32) -> Result<(), TransportError> {
        self.record.lock().unwrap().loop_count = count;
        Ok(())
    }

    fn loop_count(&self) -> i32 {
        self.record.lock().unwrap().loop_count
    }

    fn set_track_mute(&self, track: usize, mute: bool) {
        self.record.lock().unwrap().mutes.insert(track, mute);
    }

    fn track_mute(&self, track: usize) -> bool {
        self.record.lock().unwrap().mutes.get(&track).copied().unwrap_or(false)
    }

    fn add_meta_listener(&self, listener: Arc<MetaListener>) -> ListenerId {
        self.meta_listeners.add(listener)
    }

    fn remove_meta_listener(&self, id: ListenerId) -> bool {
        self.meta_listeners.remove(id)
    }

    fn add_receiver(&self, receiver: Arc<ShortReceiver>) -> ListenerId {
        self.receivers.add(receiver)
    }

    fn remove_receiver(&self, id: ListenerId) -> bool {
        self.receivers.remove(id)
    }
}

/// Generator producing a bass phrase with one note per bar
pub struct BassGenerator {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub generated: Mutex<Vec<SongContext>>,
}

impl BassGenerator {
    pub fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            generated: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MusicGenerator for BassGenerator {
    fn generate(&self, context: &SongContext) -> Result<PhraseMap, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut phrase = Phrase::new(1);
        let mut beat = 0.0;
        for part in context.song_parts() {
            for _ in 0..part.nb_bars {
                phrase.add(NoteEvent::new(36, 100, beat, 1.0));
                beat += part.time_signature.natural_beats() as f32;
            }
        }
        let mut phrases = PhraseMap::new();
        phrases.insert("Bass".to_string(), phrase);
        self.generated.lock().unwrap().push(context.clone());
        Ok(phrases)
    }
}

/// Song of `nb_bars` bars in 4/4 with a chord on each bar
pub fn song(nb_bars: u32, bpm: f32) -> Arc<Song> {
    let mut song = Song::new("Blues", Tempo::new(bpm));
    song.add_part("A", nb_bars, TimeSignature::four_four());
    for bar in 0..nb_bars {
        let name = if bar % 2 == 0 { "C7" } else { "F7" };
        song.add_chord(name, jjazz_playback::Position::at_bar(bar));
    }
    Arc::new(song)
}

pub fn context(nb_bars: u32, bpm: f32) -> SongContext {
    SongContext::new(song(nb_bars, bpm), None).unwrap()
}

pub fn sub_context(nb_bars: u32, from: u32, to: u32) -> SongContext {
    SongContext::new(song(nb_bars, 120.0), BarRange::new(from, to)).unwrap()
}

/// Poll `condition` until it holds or the timeout elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
