// Song playback session - sequence built from a song context and generated phrases
//
// Sequence layout:
//   track 0        song name, tempo, time signature, tempo factor markers
//   tracks 1..n    one track per generated phrase
//   then           control track, click track (if enabled), precount (if enabled)

use crate::error::{GenerationError, MusicGenerationError, PlaybackError, PlaybackResult};
use crate::generation::{GenerationResult, MusicGenerator, PhraseMap};
use crate::listeners::{ChangeListener, ListenerId, ListenerList};
use crate::midi::meta::MetaMessage;
use crate::sequencer::control_track::ControlTrack;
use crate::sequencer::sequence::{MidiEvent, Sequence};
use crate::sequencer::timeline::{Position, Tempo};
use crate::session::{
    ControlTrackProvider, EndOfPlaybackActionProvider, PlaybackSession, SessionContext, SessionEvent,
    SessionId, SessionState, SongContextProvider,
};
use crate::settings::{PlaybackPreferences, PlaybackSettings};
use crate::song::{BarRange, SongContext};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info};

type EndAction = dyn Fn() + Send + Sync;

struct SessionData {
    state: SessionState,
    dirty: bool,
    tempo: f32,
    sequence: Option<Arc<Sequence>>,
    control_track: Option<Arc<ControlTrack>>,
    song_start_tick: u64,
    loop_end_tick: i64,
    loop_count: i32,
    /// Phrase name -> sequence track index
    phrase_tracks: BTreeMap<String, usize>,
    muted: HashMap<usize, bool>,
    /// Preferences the sequence was built with
    built_with: Option<PlaybackPreferences>,
}

pub struct SongPlaybackSession {
    id: SessionId,
    context_tag: SessionContext,
    song_context: SongContext,
    generator: Option<Arc<dyn MusicGenerator>>,
    phrases: Mutex<Option<Arc<PhraseMap>>>,
    settings: Arc<PlaybackSettings>,
    data: Mutex<SessionData>,
    listeners: ListenerList<ChangeListener<SessionEvent>>,
    end_action: Mutex<Option<Arc<EndAction>>>,
    settings_listener: Mutex<Option<ListenerId>>,
}

impl SongPlaybackSession {
    /// Session generating its phrases with `generator`
    pub fn new(
        song_context: SongContext,
        context_tag: SessionContext,
        generator: Arc<dyn MusicGenerator>,
        settings: Arc<PlaybackSettings>,
    ) -> Arc<Self> {
        Self::build(song_context, context_tag, Some(generator), None, settings)
    }

    /// Session using the phrases of a successful queue result
    pub fn from_result(
        result: &GenerationResult,
        context_tag: SessionContext,
        settings: Arc<PlaybackSettings>,
    ) -> Result<Arc<Self>, GenerationError> {
        let phrases = result.outcome.clone()?;
        Ok(Self::build(
            result.song_context.clone(),
            context_tag,
            None,
            Some(phrases),
            settings,
        ))
    }

    fn build(
        song_context: SongContext,
        context_tag: SessionContext,
        generator: Option<Arc<dyn MusicGenerator>>,
        phrases: Option<Arc<PhraseMap>>,
        settings: Arc<PlaybackSettings>,
    ) -> Arc<Self> {
        let tempo = song_context.tempo().bpm();
        let loop_count = settings.loop_count();
        let session = Arc::new(Self {
            id: SessionId::new(),
            context_tag,
            song_context,
            generator,
            phrases: Mutex::new(phrases),
            settings,
            data: Mutex::new(SessionData {
                state: SessionState::New,
                dirty: false,
                tempo,
                sequence: None,
                control_track: None,
                song_start_tick: 0,
                loop_end_tick: -1,
                loop_count,
                phrase_tracks: BTreeMap::new(),
                muted: HashMap::new(),
                built_with: None,
            }),
            listeners: ListenerList::new(),
            end_action: Mutex::new(None),
            settings_listener: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&session);
        let id = session.settings.add_change_listener(Arc::new(move |prefs: &PlaybackPreferences| {
            if let Some(session) = weak.upgrade() {
                session.preferences_changed(prefs);
            }
        }));
        if let Ok(mut slot) = session.settings_listener.lock() {
            *slot = Some(id);
        }
        session
    }

    /// Set the action run after playback stops or pauses
    pub fn set_end_action(&self, action: Option<Arc<EndAction>>) {
        if let Ok(mut slot) = self.end_action.lock() {
            *slot = action;
        }
    }

    fn data(&self) -> MutexGuard<'_, SessionData> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fire(&self, event: SessionEvent) {
        self.listeners.for_each(|l| l(&event));
    }

    /// Mark the sequence as outdated
    pub fn set_dirty(&self) {
        let changed = {
            let mut data = self.data();
            let changed = data.state == SessionState::Generated && !data.dirty;
            data.dirty |= changed;
            changed
        };
        if changed {
            debug!("Session {} is dirty", self.id);
            self.fire(SessionEvent::DirtyChanged(true));
        }
    }

    pub fn set_tempo(&self, bpm: f32) {
        let bpm = Tempo::new(bpm).bpm();
        let old = {
            let mut data = self.data();
            std::mem::replace(&mut data.tempo, bpm)
        };
        if old != bpm {
            self.fire(SessionEvent::TempoChanged { old, new: bpm });
        }
    }

    pub fn set_loop_count(&self, count: i32) {
        let changed = {
            let mut data = self.data();
            let changed = data.loop_count != count;
            data.loop_count = count;
            changed
        };
        if changed {
            self.fire(SessionEvent::LoopCountChanged(count));
        }
    }

    /// Mute or unmute the track of a generated phrase. Returns false if unknown.
    pub fn set_phrase_muted(&self, phrase_name: &str, muted: bool) -> bool {
        let changed = {
            let mut data = self.data();
            let Some(track) = data.phrase_tracks.get(phrase_name).copied() else {
                return false;
            };
            let old = data.muted.insert(track, muted);
            old != Some(muted)
        };
        if changed {
            self.fire(SessionEvent::TracksMuteChanged);
        }
        true
    }

    /// Sequence track index of a generated phrase
    pub fn phrase_track(&self, phrase_name: &str) -> Option<usize> {
        self.data().phrase_tracks.get(phrase_name).copied()
    }

    fn preferences_changed(&self, prefs: &PlaybackPreferences) {
        let (structure_changed, loop_changed) = {
            let data = self.data();
            match &data.built_with {
                Some(built) if data.state == SessionState::Generated => (
                    built.click_enabled != prefs.click_enabled
                        || built.precount_enabled != prefs.precount_enabled
                        || built.control_track_enabled != prefs.control_track_enabled
                        || built.click_sound() != prefs.click_sound()
                        || (prefs.precount_enabled && built.precount_mode != prefs.precount_mode),
                    data.loop_count != prefs.loop_count,
                ),
                _ => (false, data.loop_count != prefs.loop_count),
            }
        };
        if loop_changed {
            self.set_loop_count(prefs.loop_count);
        }
        if structure_changed {
            self.set_dirty();
        }
    }

    fn phrases(&self) -> PlaybackResult<Arc<PhraseMap>> {
        if let Some(phrases) = self.phrases.lock().ok().and_then(|p| p.clone()) {
            return Ok(phrases);
        }
        let Some(generator) = &self.generator else {
            return Err(PlaybackError::IllegalState("No music generator".to_string()));
        };
        match generator.generate(&self.song_context) {
            Ok(phrases) => Ok(Arc::new(phrases)),
            Err(GenerationError::UserFacing(e)) => Err(e.into()),
            Err(e @ GenerationError::Internal(_)) => {
                error!("Music generation failed: {}", e);
                Err(MusicGenerationError::new(e.to_string()).into())
            }
        }
    }

    fn build_sequence(&self, phrases: &PhraseMap, prefs: &PlaybackPreferences) -> BuiltSequence {
        let ctx = &self.song_context;
        let song = ctx.song();
        let mut sequence = Sequence::new();

        let t0 = sequence.create_track();
        if let Some(track) = sequence.track_mut(t0) {
            track.add(MidiEvent::meta(0, MetaMessage::track_name(&song.name)));
            track.add(MidiEvent::meta(0, MetaMessage::tempo(ctx.tempo().micros_per_quarter())));
            if let Some(first) = ctx.song_parts().next() {
                track.add(MidiEvent::meta(
                    0,
                    MetaMessage::time_signature(first.time_signature.to_meta_bytes()),
                ));
            }
            // Tempo factor marker where a song part changes the tempo factor
            let mut previous: Option<f32> = None;
            for part in ctx.song_parts() {
                if previous == Some(part.tempo_factor) {
                    continue;
                }
                previous = Some(part.tempo_factor);
                let Some(range) = ctx.part_bar_range(part) else {
                    continue;
                };
                let Some(tick) = ctx.relative_tick(Position::at_bar(range.from)) else {
                    continue;
                };
                match MetaMessage::tempo_factor(part.tempo_factor) {
                    Ok(marker) => track.add(MidiEvent::meta(tick, marker)),
                    Err(e) => error!("Invalid tempo factor for song part {}: {}", part.name, e),
                }
            }
        }

        let mut phrase_tracks = BTreeMap::new();
        for (name, phrase) in phrases {
            let index = sequence.create_track();
            if let Some(track) = sequence.track_mut(index) {
                track.add(MidiEvent::meta(0, MetaMessage::track_name(name)));
                phrase.fill_track(track, 0);
            }
            phrase_tracks.insert(name.clone(), index);
        }

        let control_track = if prefs.control_track_enabled {
            let index = sequence.create_track();
            let control_track = ControlTrack::new(ctx, index);
            if let Some(track) = sequence.track_mut(index) {
                control_track.fill_track(track);
            }
            Some(Arc::new(control_track))
        } else {
            None
        };

        if prefs.click_enabled {
            self.settings.add_click_track(&mut sequence, ctx);
        }
        let song_start_tick = if prefs.precount_enabled {
            self.settings.add_precount_click_track(&mut sequence, ctx)
        } else {
            0
        };

        BuiltSequence {
            sequence,
            control_track,
            song_start_tick,
            phrase_tracks,
        }
    }
}

struct BuiltSequence {
    sequence: Sequence,
    control_track: Option<Arc<ControlTrack>>,
    song_start_tick: u64,
    phrase_tracks: BTreeMap<String, usize>,
}

impl PlaybackSession for SongPlaybackSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> SessionState {
        self.data().state
    }

    fn context(&self) -> SessionContext {
        self.context_tag
    }

    fn generate(&self, silent: bool) -> PlaybackResult<()> {
        let state = self.state();
        if state != SessionState::New {
            return Err(PlaybackError::IllegalState(format!(
                "Session {} can't be generated in state {:?}",
                self.id, state
            )));
        }
        if !silent {
            info!("Generating music for {}", self.song_context.song().name);
        }

        let phrases = self.phrases()?;
        let prefs = self.settings.preferences();
        let built = self.build_sequence(&phrases, &prefs);
        let tick_length = self.song_context.tick_length();

        {
            let mut data = self.data();
            if data.state != SessionState::New {
                // Closed while generating
                return Err(PlaybackError::IllegalState(format!("Session {} was closed", self.id)));
            }
            data.loop_end_tick = (built.song_start_tick + tick_length) as i64;
            data.song_start_tick = built.song_start_tick;
            data.sequence = Some(Arc::new(built.sequence));
            data.control_track = built.control_track;
            data.muted = built.phrase_tracks.values().map(|&t| (t, false)).collect();
            data.phrase_tracks = built.phrase_tracks;
            data.loop_count = prefs.loop_count;
            data.built_with = Some(prefs);
            data.state = SessionState::Generated;
        }
        debug!("Session {} generated", self.id);
        self.fire(SessionEvent::StateChanged {
            old: SessionState::New,
            new: SessionState::Generated,
        });
        Ok(())
    }

    fn sequence(&self) -> Option<Arc<Sequence>> {
        self.data().sequence.clone()
    }

    fn tempo(&self) -> f32 {
        self.data().tempo
    }

    fn loop_start_tick(&self) -> u64 {
        self.data().song_start_tick
    }

    fn loop_end_tick(&self) -> i64 {
        self.data().loop_end_tick
    }

    fn loop_count(&self) -> i32 {
        self.data().loop_count
    }

    fn bar_range(&self) -> Option<BarRange> {
        Some(self.song_context.bar_range())
    }

    fn tracks_mute_status(&self) -> HashMap<usize, bool> {
        self.data().muted.clone()
    }

    fn is_dirty(&self) -> bool {
        self.data().dirty
    }

    fn close(&self) {
        let old = {
            let mut data = self.data();
            let old = data.state;
            data.state = SessionState::Closed;
            data.sequence = None;
            old
        };
        if old == SessionState::Closed {
            return;
        }
        if let Some(id) = self.settings_listener.lock().ok().and_then(|mut l| l.take()) {
            self.settings.remove_change_listener(id);
        }
        debug!("Session {} closed", self.id);
        self.fire(SessionEvent::StateChanged {
            old,
            new: SessionState::Closed,
        });
        self.listeners.clear();
    }

    fn add_listener(&self, listener: Arc<ChangeListener<SessionEvent>>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn control_track_provider(&self) -> Option<&dyn ControlTrackProvider> {
        Some(self)
    }

    fn song_context_provider(&self) -> Option<&dyn SongContextProvider> {
        Some(self)
    }

    fn end_of_playback_action(&self) -> Option<&dyn EndOfPlaybackActionProvider> {
        Some(self)
    }
}

impl ControlTrackProvider for SongPlaybackSession {
    fn control_track(&self) -> Option<Arc<ControlTrack>> {
        self.data().control_track.clone()
    }

    fn is_control_track_enabled(&self) -> bool {
        self.data().control_track.is_some()
    }
}

impl SongContextProvider for SongPlaybackSession {
    fn song_context(&self) -> &SongContext {
        &self.song_context
    }

    fn song_start_tick(&self) -> u64 {
        self.data().song_start_tick
    }
}

impl EndOfPlaybackActionProvider for SongPlaybackSession {
    fn run_end_of_playback_action(&self) {
        let action = self.end_action.lock().ok().and_then(|a| a.clone());
        if let Some(action) = action {
            action();
        }
    }
}

impl Drop for SongPlaybackSession {
    fn drop(&mut self) {
        if let Some(id) = self.settings_listener.lock().ok().and_then(|mut l| l.take()) {
            self.settings.remove_change_listener(id);
        }
    }
}
