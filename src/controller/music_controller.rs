// Music controller - playback state machine
//
// States: Disabled, Stopped, Paused, Playing.
// - Stopped <-> Disabled only through acquire_sequencer()/release_sequencer()
// - play() from Stopped or Paused, resume() from Paused, pause() from Playing
//
// Transport and session callbacks only enqueue a ControllerEvent; the controller
// event thread processes them. Listener notifications go through the latency
// dispatcher. State and session change notifications are fired synchronously,
// after the internal lock is released.

use crate::config::ControllerConfig;
use crate::controller::activity::ActivityThrottle;
use crate::controller::dispatch::NotificationDispatcher;
use crate::controller::listener::{NoteListener, PlaybackListener};
use crate::error::{MusicGenerationError, PlaybackError, PlaybackResult};
use crate::listeners::{ChangeListener, ListenerId, ListenerList};
use crate::midi::event::{ChannelEvent, ShortMessage};
use crate::midi::meta::{META_BEAT_POSITION, META_CHORD_SYMBOL, META_END_OF_TRACK, META_TEMPO_FACTOR, MetaMessage};
use crate::midi::output::OutputSynthManager;
use crate::sequencer::timeline::Position;
use crate::sequencer::transport::{LOOP_END_OF_SEQUENCE, SequencerPort, TransportError};
use crate::session::{PlaybackSession, SessionContext, SessionEvent, SessionId, SessionState};
use crate::song::{ChordSymbolItem, SongPart};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PROP_STATE: &str = "PropState";
pub const PROP_PLAYBACK_SESSION: &str = "PropPlaybackSession";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Disabled,
    Stopped,
    Paused,
    Playing,
}

/// Property change of the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerChange {
    State {
        old: ControllerState,
        new: ControllerState,
    },
    PlaybackSession {
        old: Option<SessionId>,
        new: Option<SessionId>,
    },
}

impl ControllerChange {
    pub fn property_name(&self) -> &'static str {
        match self {
            ControllerChange::State { .. } => PROP_STATE,
            ControllerChange::PlaybackSession { .. } => PROP_PLAYBACK_SESSION,
        }
    }
}

/// Token identifying the external owner of the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Meta event decoded at the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    EndOfSequence,
    ChordSymbol(MetaMessage),
    Position(MetaMessage),
    TempoFactor(f32),
    Other,
}

impl ControlEvent {
    pub fn decode(meta: MetaMessage) -> Self {
        match meta.meta_type() {
            META_END_OF_TRACK => ControlEvent::EndOfSequence,
            META_CHORD_SYMBOL => ControlEvent::ChordSymbol(meta),
            META_BEAT_POSITION => ControlEvent::Position(meta),
            META_TEMPO_FACTOR => match meta.tempo_factor_value() {
                Some(factor) => ControlEvent::TempoFactor(factor),
                None => {
                    error!("Invalid tempo factor marker: {:02X?}", meta.data());
                    ControlEvent::Other
                }
            },
            _ => ControlEvent::Other,
        }
    }
}

enum ControllerEvent {
    Meta(MetaMessage),
    Short(ShortMessage),
    Session(SessionId, SessionEvent),
    Shutdown,
}

type Session = Arc<dyn PlaybackSession>;

struct Inner {
    state: ControllerState,
    session: Option<Session>,
    session_listener: Option<ListenerId>,
    lock: Option<LockToken>,
    /// Own meta listener and receiver on the transport, None while disabled
    transport_listeners: Option<(ListenerId, ListenerId)>,
    position_tracking: bool,
    current_beat: Position,
    current_chord: Option<ChordSymbolItem>,
    current_part: Option<SongPart>,
    song_part_tempo_factor: f32,
    activity: ActivityThrottle,
}

/// Work to do once the internal lock is released
#[derive(Default)]
struct Effects {
    changes: Vec<ControllerChange>,
    to_close: Vec<Session>,
    end_action: Option<Session>,
    enabled: Option<bool>,
}

pub struct MusicController {
    config: ControllerConfig,
    sequencer: Arc<dyn SequencerPort>,
    output: Arc<OutputSynthManager>,
    inner: Mutex<Inner>,
    playback_listeners: ListenerList<dyn PlaybackListener>,
    note_listeners: ListenerList<dyn NoteListener>,
    change_listeners: ListenerList<ChangeListener<ControllerChange>>,
    dispatcher: NotificationDispatcher,
    events_tx: Sender<ControllerEvent>,
}

impl MusicController {
    pub fn new(
        config: ControllerConfig,
        sequencer: Arc<dyn SequencerPort>,
        output: Arc<OutputSynthManager>,
    ) -> std::io::Result<Arc<Self>> {
        let (events_tx, events_rx) = unbounded();
        let activity = ActivityThrottle::new(config.activity_min_period());
        let controller = Arc::new(Self {
            config,
            sequencer,
            output,
            inner: Mutex::new(Inner {
                state: ControllerState::Stopped,
                session: None,
                session_listener: None,
                lock: None,
                transport_listeners: None,
                position_tracking: false,
                current_beat: Position::default(),
                current_chord: None,
                current_part: None,
                song_part_tempo_factor: 1.0,
                activity,
            }),
            playback_listeners: ListenerList::new(),
            note_listeners: ListenerList::new(),
            change_listeners: ListenerList::new(),
            dispatcher: NotificationDispatcher::new()?,
            events_tx,
        });

        let weak = Arc::downgrade(&controller);
        std::thread::Builder::new()
            .name("music-controller".to_string())
            .spawn(move || event_loop(weak, events_rx))?;

        controller.sequencer.set_tempo_in_bpm(controller.config.reference_tempo);
        controller.sequencer.set_tempo_factor(1.0);
        {
            let mut inner = controller.lock();
            controller.connect_transport(&mut inner);
        }
        Ok(controller)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ------------------------------------------------------------------
    // Getters and listeners
    // ------------------------------------------------------------------

    pub fn state(&self) -> ControllerState {
        self.lock().state
    }

    pub fn playback_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn current_beat_position(&self) -> Position {
        self.lock().current_beat
    }

    pub fn current_chord_symbol(&self) -> Option<ChordSymbolItem> {
        self.lock().current_chord.clone()
    }

    pub fn current_song_part(&self) -> Option<SongPart> {
        self.lock().current_part.clone()
    }

    pub fn is_position_tracking_enabled(&self) -> bool {
        self.lock().position_tracking
    }

    pub fn add_playback_listener(&self, listener: Arc<dyn PlaybackListener>) -> ListenerId {
        self.playback_listeners.add(listener)
    }

    pub fn remove_playback_listener(&self, id: ListenerId) -> bool {
        self.playback_listeners.remove(id)
    }

    pub fn add_note_listener(&self, listener: Arc<dyn NoteListener>) -> ListenerId {
        self.note_listeners.add(listener)
    }

    pub fn remove_note_listener(&self, id: ListenerId) -> bool {
        self.note_listeners.remove(id)
    }

    pub fn add_change_listener(&self, listener: Arc<ChangeListener<ControllerChange>>) -> ListenerId {
        self.change_listeners.add(listener)
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.change_listeners.remove(id)
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Replace the current playback session.
    ///
    /// A New session is generated first. If generation fails the current session
    /// is kept but the transport has already been reset.
    pub fn set_playback_session(&self, session: Option<Session>, silent: bool) -> PlaybackResult<()> {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            let same = match (&inner.session, &session) {
                (Some(current), Some(new)) => current.id() == new.id(),
                (None, None) => true,
                _ => false,
            };
            if same {
                return Ok(());
            }
            match inner.state {
                ControllerState::Disabled => {
                    return Err(PlaybackError::IllegalState(
                        "Sequencer is locked by another owner".to_string(),
                    ));
                }
                ControllerState::Playing => {
                    return Err(PlaybackError::IllegalState(
                        "A different session is already playing".to_string(),
                    ));
                }
                ControllerState::Paused => self.stop_locked(&mut inner, &mut effects),
                ControllerState::Stopped => {}
            }
            if let Err(e) = self.sequencer.set_sequence(None) {
                warn!("Failed to reset transport sequence: {}", e);
            }
        }
        self.apply_effects(effects);

        if let Some(new) = &session {
            match new.state() {
                SessionState::New => new.generate(silent)?,
                SessionState::Closed => {
                    return Err(PlaybackError::IllegalArgument(format!(
                        "Session {} is closed",
                        new.id()
                    )));
                }
                SessionState::Generated => {}
            }
        }

        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            if inner.state == ControllerState::Disabled {
                return Err(PlaybackError::IllegalState(
                    "Sequencer was locked during session generation".to_string(),
                ));
            }
            let old_id = inner.session.as_ref().map(|s| s.id());
            self.detach_session(&mut inner, &mut effects);
            if let Some(new) = session {
                self.attach_session(&mut inner, new, &mut effects);
            }
            let new_id = inner.session.as_ref().map(|s| s.id());
            effects.changes.push(ControllerChange::PlaybackSession {
                old: old_id,
                new: new_id,
            });
        }
        self.apply_effects(effects);
        Ok(())
    }

    fn attach_session(&self, inner: &mut Inner, session: Session, effects: &mut Effects) {
        let tx = self.events_tx.clone();
        let id = session.id();
        let listener = session.add_listener(Arc::new(move |event: &SessionEvent| {
            let _ = tx.send(ControllerEvent::Session(id, event.clone()));
        }));
        inner.session_listener = Some(listener);
        let tracking = session
            .control_track_provider()
            .is_some_and(|p| p.is_control_track_enabled());
        if tracking != inner.position_tracking {
            inner.position_tracking = tracking;
            effects.enabled = Some(tracking);
        }
        debug!("Playback session {} attached", id);
        inner.session = Some(session);
    }

    fn detach_session(&self, inner: &mut Inner, effects: &mut Effects) {
        if let Some(old) = inner.session.take() {
            if let Some(id) = inner.session_listener.take() {
                old.remove_listener(id);
            }
            debug!("Playback session {} detached", old.id());
            effects.to_close.push(old);
        }
        if inner.position_tracking {
            inner.position_tracking = false;
            effects.enabled = Some(false);
        }
    }

    // ------------------------------------------------------------------
    // Transport control
    // ------------------------------------------------------------------

    /// Play the session from `from_bar`. Playing from Paused restarts from scratch.
    pub fn play(&self, from_bar: u32) -> PlaybackResult<()> {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            let Some(session) = inner.session.clone() else {
                return Ok(());
            };
            if session.state() != SessionState::Generated {
                return Err(PlaybackError::IllegalState(format!(
                    "Session {} is not generated: {:?}",
                    session.id(),
                    session.state()
                )));
            }
            match inner.state {
                ControllerState::Disabled | ControllerState::Playing => {
                    return Err(PlaybackError::IllegalState(format!(
                        "Can't play in state {:?}",
                        inner.state
                    )));
                }
                ControllerState::Stopped | ControllerState::Paused => {}
            }
            if !self.output.is_midi_out_available() {
                return Err(MusicGenerationError::new("No Midi output device").into());
            }
            check_bar(session.as_ref(), from_bar)?;

            let sequence = session
                .sequence()
                .ok_or_else(|| PlaybackError::IllegalState("Generated session has no sequence".to_string()))?;
            if self.config.debug_played_sequence {
                debug!("Played sequence:\n{}", sequence.dump());
            }
            self.sequencer.set_sequence(Some(sequence)).map_err(transport_error)?;
            self.apply_loop(session.as_ref()).map_err(transport_error)?;
            self.apply_mutes(session.as_ref());

            inner.song_part_tempo_factor = 1.0;
            self.apply_tempo_factor(&inner);

            self.set_position(&mut inner, from_bar);
            inner.activity.reset();
            self.sequencer.start().map_err(transport_error)?;
            self.set_state(&mut inner, ControllerState::Playing, &mut effects);
            info!("Playing session {} from bar {}", session.id(), from_bar);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Restart a paused playback without moving the position
    pub fn resume(&self) -> PlaybackResult<()> {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            match inner.state {
                ControllerState::Disabled => {
                    return Err(PlaybackError::IllegalState("Can't resume while disabled".to_string()));
                }
                ControllerState::Stopped | ControllerState::Playing => return Ok(()),
                ControllerState::Paused => {}
            }
            let generated = inner
                .session
                .as_ref()
                .is_some_and(|s| s.state() == SessionState::Generated);
            if !generated {
                return Err(PlaybackError::IllegalState(
                    "Paused session is no longer generated".to_string(),
                ));
            }
            if !self.output.is_midi_out_available() {
                return Err(MusicGenerationError::new("No Midi output device").into());
            }
            self.sequencer.start().map_err(transport_error)?;
            self.set_state(&mut inner, ControllerState::Playing, &mut effects);
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Pause playback. A dirty session is stopped instead.
    pub fn pause(&self) -> PlaybackResult<()> {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            match inner.state {
                ControllerState::Disabled => {
                    return Err(PlaybackError::IllegalState("Can't pause while disabled".to_string()));
                }
                ControllerState::Stopped | ControllerState::Paused => return Ok(()),
                ControllerState::Playing => {}
            }
            if inner.session.as_ref().is_some_and(|s| s.is_dirty()) {
                debug!("Session is dirty, stopping instead of pausing");
                self.stop_locked(&mut inner, &mut effects);
            } else {
                self.sequencer.stop();
                self.dispatcher.cancel_pending();
                self.set_state(&mut inner, ControllerState::Paused, &mut effects);
                effects.end_action = inner.session.clone();
            }
        }
        self.apply_effects(effects);
        Ok(())
    }

    /// Stop playback and move back to the start of the session bar range
    pub fn stop(&self) {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            self.stop_locked(&mut inner, &mut effects);
        }
        self.apply_effects(effects);
    }

    fn stop_locked(&self, inner: &mut Inner, effects: &mut Effects) {
        match inner.state {
            ControllerState::Stopped | ControllerState::Disabled => return,
            ControllerState::Playing => {
                self.sequencer.stop();
                self.dispatcher.cancel_pending();
            }
            ControllerState::Paused => {}
        }
        inner.current_part = None;
        inner.current_chord = None;
        inner.song_part_tempo_factor = 1.0;
        self.apply_tempo_factor(inner);
        self.set_state(inner, ControllerState::Stopped, effects);

        // After the state change so position listeners see a stopped playback
        let first_bar = inner
            .session
            .as_ref()
            .and_then(|s| s.bar_range())
            .map(|r| r.from)
            .unwrap_or(0);
        self.set_position(inner, first_bar);
        effects.end_action = inner.session.clone();
    }

    /// Move the position of a paused playback
    pub fn change_paused_bar(&self, bar: u32) -> PlaybackResult<()> {
        let mut inner = self.lock();
        if inner.state != ControllerState::Paused {
            return Err(PlaybackError::IllegalState(format!(
                "Can't change bar in state {:?}",
                inner.state
            )));
        }
        if let Some(session) = &inner.session {
            check_bar(session.as_ref(), bar)?;
        }
        self.set_position(&mut inner, bar);
        Ok(())
    }

    // ------------------------------------------------------------------
    // External sequencer lock
    // ------------------------------------------------------------------

    /// Lend the transport to an external owner.
    ///
    /// Re-entrant for the same token. Returns None if another token holds the lock
    /// or if playing. The current session is closed.
    pub fn acquire_sequencer(&self, token: LockToken) -> Option<Arc<dyn SequencerPort>> {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            match inner.lock {
                Some(holder) if holder == token => return Some(Arc::clone(&self.sequencer)),
                Some(_) => return None,
                None => {}
            }
            match inner.state {
                ControllerState::Playing | ControllerState::Disabled => return None,
                ControllerState::Paused => self.stop_locked(&mut inner, &mut effects),
                ControllerState::Stopped => {}
            }
            if inner.session.is_some() {
                let old = inner.session.as_ref().map(|s| s.id());
                self.detach_session(&mut inner, &mut effects);
                effects.changes.push(ControllerChange::PlaybackSession { old, new: None });
            }
            if let Err(e) = self.sequencer.set_sequence(None) {
                warn!("Failed to reset transport sequence: {}", e);
            }
            self.disconnect_transport(&mut inner);
            inner.lock = Some(token);
            self.set_state(&mut inner, ControllerState::Disabled, &mut effects);
            debug!("Sequencer acquired by {}", token);
        }
        self.apply_effects(effects);
        Some(Arc::clone(&self.sequencer))
    }

    /// Give the transport back. Fails if `token` does not hold the lock.
    pub fn release_sequencer(&self, token: LockToken) -> PlaybackResult<()> {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            if inner.lock != Some(token) {
                return Err(PlaybackError::IllegalArgument(format!(
                    "Lock {} does not hold the sequencer",
                    token
                )));
            }
            inner.lock = None;
            self.sequencer.stop();
            self.sequencer.set_tempo_in_bpm(self.config.reference_tempo);
            self.sequencer.set_tempo_factor(1.0);
            self.connect_transport(&mut inner);
            self.set_state(&mut inner, ControllerState::Stopped, &mut effects);
            debug!("Sequencer released by {}", token);
        }
        self.apply_effects(effects);
        Ok(())
    }

    fn connect_transport(&self, inner: &mut Inner) {
        if inner.transport_listeners.is_some() {
            return;
        }
        let tx = self.events_tx.clone();
        let meta = self.sequencer.add_meta_listener(Arc::new(move |meta: &MetaMessage| {
            let _ = tx.send(ControllerEvent::Meta(meta.clone()));
        }));
        let tx = self.events_tx.clone();
        let receiver = self.sequencer.add_receiver(Arc::new(move |msg: &ShortMessage| {
            let _ = tx.send(ControllerEvent::Short(*msg));
        }));
        inner.transport_listeners = Some((meta, receiver));
    }

    fn disconnect_transport(&self, inner: &mut Inner) {
        if let Some((meta, receiver)) = inner.transport_listeners.take() {
            self.sequencer.remove_meta_listener(meta);
            self.sequencer.remove_receiver(receiver);
        }
    }

    // ------------------------------------------------------------------
    // Helpers, called with the lock held
    // ------------------------------------------------------------------

    fn set_state(&self, inner: &mut Inner, state: ControllerState, effects: &mut Effects) {
        let old = inner.state;
        if old != state {
            inner.state = state;
            debug!("Controller state {:?} -> {:?}", old, state);
            effects.changes.push(ControllerChange::State { old, new: state });
        }
    }

    fn apply_loop(&self, session: &dyn PlaybackSession) -> Result<(), TransportError> {
        self.sequencer.set_loop_end_point(LOOP_END_OF_SEQUENCE)?;
        self.sequencer.set_loop_start_point(session.loop_start_tick())?;
        self.sequencer.set_loop_end_point(session.loop_end_tick())?;
        self.sequencer.set_loop_count(session.loop_count())
    }

    fn apply_mutes(&self, session: &dyn PlaybackSession) {
        for (track, muted) in session.tracks_mute_status() {
            self.sequencer.set_track_mute(track, muted);
        }
    }

    /// The transport tempo stays at the reference tempo, the musical tempo is a factor
    fn apply_tempo_factor(&self, inner: &Inner) {
        let song_tempo_factor = inner
            .session
            .as_ref()
            .map(|s| s.tempo() / self.config.reference_tempo)
            .unwrap_or(1.0);
        self.sequencer
            .set_tempo_factor(inner.song_part_tempo_factor * song_tempo_factor);
    }

    /// Move the transport to `bar` and notify the new beat position
    fn set_position(&self, inner: &mut Inner, bar: u32) {
        let (tick, position_in_beats) = match &inner.session {
            Some(session) => bar_tick(session.as_ref(), bar),
            None => (0, 0.0),
        };
        self.sequencer.set_tick_position(tick);
        let old = inner.current_beat;
        let new = Position::at_bar(bar);
        inner.current_beat = new;
        if inner.position_tracking && old != new {
            self.notify_playback(inner, move |l| l.beat_changed(old, new, position_in_beats));
        }
    }

    fn session_context(inner: &Inner) -> Option<SessionContext> {
        inner.session.as_ref().map(|s| s.context())
    }

    /// Notify the interested playback listeners after the output latency
    fn notify_playback(&self, inner: &Inner, f: impl Fn(&dyn PlaybackListener) + Send + 'static) {
        let context = Self::session_context(inner);
        let targets: Vec<Arc<dyn PlaybackListener>> = self
            .playback_listeners
            .snapshot()
            .into_iter()
            .filter(|l| l.accepts(context))
            .collect();
        if targets.is_empty() {
            return;
        }
        self.dispatcher.submit(
            self.latency(),
            Box::new(move || {
                for listener in &targets {
                    f(listener.as_ref());
                }
            }),
        );
    }

    fn notify_notes(&self, f: impl Fn(&dyn NoteListener) + Send + 'static) {
        let targets = self.note_listeners.snapshot();
        if targets.is_empty() {
            return;
        }
        self.dispatcher.submit(
            self.latency(),
            Box::new(move || {
                for listener in &targets {
                    f(listener.as_ref());
                }
            }),
        );
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.output.audio_latency_ms() as u64)
    }

    /// Fire property changes and run session side effects, without the lock
    fn apply_effects(&self, effects: Effects) {
        for session in effects.to_close {
            session.close();
        }
        if let Some(enabled) = effects.enabled {
            for listener in self.playback_listeners.snapshot() {
                listener.enabled_changed(enabled);
            }
        }
        for change in &effects.changes {
            self.change_listeners.for_each(|l| l(change));
        }
        if let Some(session) = effects.end_action {
            if let Some(provider) = session.end_of_playback_action() {
                provider.run_end_of_playback_action();
            }
        }
    }

    // ------------------------------------------------------------------
    // Event thread
    // ------------------------------------------------------------------

    fn handle_event(&self, event: ControllerEvent) {
        match event {
            ControllerEvent::Meta(meta) => self.handle_meta(meta),
            ControllerEvent::Short(msg) => self.handle_short(msg),
            ControllerEvent::Session(id, event) => self.handle_session_event(id, event),
            ControllerEvent::Shutdown => {}
        }
    }

    fn handle_meta(&self, meta: MetaMessage) {
        match ControlEvent::decode(meta) {
            ControlEvent::EndOfSequence => {
                debug!("End of sequence");
                self.stop();
            }
            ControlEvent::ChordSymbol(marker) => {
                let mut inner = self.lock();
                if inner.state != ControllerState::Playing {
                    return;
                }
                let Some(chord) = control_track_lookup(&inner, |ct| ct.chord_symbol(&marker).cloned()) else {
                    return;
                };
                if inner.current_chord.as_ref().map(|c| c.id()) == Some(chord.id()) {
                    return;
                }
                inner.current_chord = Some(chord.clone());
                self.notify_playback(&inner, move |l| l.chord_symbol_changed(&chord));
            }
            ControlEvent::Position(marker) => {
                let mut inner = self.lock();
                if inner.state != ControllerState::Playing {
                    return;
                }
                let Some((new, beats)) = control_track_lookup(&inner, |ct| {
                    Some((ct.position(&marker)?, ct.position_in_beats(&marker)?))
                }) else {
                    return;
                };
                let old = inner.current_beat;
                inner.current_beat = new;
                self.notify_playback(&inner, move |l| l.beat_changed(old, new, beats));

                let part = inner
                    .session
                    .as_ref()
                    .and_then(|s| s.song_context_provider())
                    .and_then(|p| p.song_context().song_part_at(new.bar).cloned());
                if let Some(part) = part {
                    let changed = inner
                        .current_part
                        .as_ref()
                        .is_none_or(|p| p.start_bar != part.start_bar || p.name != part.name);
                    if changed {
                        inner.current_part = Some(part.clone());
                        self.notify_playback(&inner, move |l| l.song_part_changed(&part));
                    }
                }
            }
            ControlEvent::TempoFactor(factor) => {
                let mut inner = self.lock();
                if inner.state != ControllerState::Playing {
                    return;
                }
                inner.song_part_tempo_factor = factor;
                self.apply_tempo_factor(&inner);
            }
            ControlEvent::Other => {}
        }
    }

    fn handle_short(&self, msg: ShortMessage) {
        let tick = self.sequencer.tick_position();
        match msg.kind() {
            ChannelEvent::NoteOn {
                channel,
                pitch,
                velocity,
            } => {
                self.notify_notes(move |l| l.note_on(tick, channel, pitch, velocity));
                let mut inner = self.lock();
                if inner.activity.should_fire(channel, Instant::now()) {
                    self.notify_playback(&inner, move |l| l.midi_activity(tick, channel));
                }
            }
            ChannelEvent::NoteOff { channel, pitch } => {
                self.notify_notes(move |l| l.note_off(tick, channel, pitch));
            }
            _ => {}
        }
    }

    fn handle_session_event(&self, id: SessionId, event: SessionEvent) {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            if inner.session.as_ref().map(|s| s.id()) != Some(id) {
                return;
            }
            match event {
                SessionEvent::StateChanged {
                    new: SessionState::Closed,
                    ..
                } => {
                    debug!("Current session closed");
                    self.stop_locked(&mut inner, &mut effects);
                    self.detach_session(&mut inner, &mut effects);
                    // Already closed
                    effects.to_close.clear();
                    if let Err(e) = self.sequencer.set_sequence(None) {
                        warn!("Failed to reset transport sequence: {}", e);
                    }
                    effects.changes.push(ControllerChange::PlaybackSession { old: Some(id), new: None });
                }
                SessionEvent::DirtyChanged(true) if inner.state == ControllerState::Paused => {
                    self.stop_locked(&mut inner, &mut effects);
                }
                SessionEvent::TempoChanged { .. } => self.apply_tempo_factor(&inner),
                SessionEvent::TracksMuteChanged => {
                    if let Some(session) = &inner.session {
                        self.apply_mutes(session.as_ref());
                    }
                }
                SessionEvent::LoopCountChanged(count) => {
                    if let Err(e) = self.sequencer.set_loop_count(count) {
                        warn!("Can't update loop count: {}", e);
                    }
                }
                _ => {}
            }
        }
        self.apply_effects(effects);
    }
}

impl Drop for MusicController {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((meta, receiver)) = inner.transport_listeners.take() {
            self.sequencer.remove_meta_listener(meta);
            self.sequencer.remove_receiver(receiver);
        }
        if let (Some(session), Some(id)) = (&inner.session, inner.session_listener.take()) {
            session.remove_listener(id);
        }
        let _ = self.events_tx.send(ControllerEvent::Shutdown);
    }
}

fn event_loop(controller: Weak<MusicController>, rx: Receiver<ControllerEvent>) {
    for event in rx {
        if matches!(event, ControllerEvent::Shutdown) {
            break;
        }
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.handle_event(event);
    }
    debug!("Music controller event thread stopped");
}

fn control_track_lookup<T>(
    inner: &Inner,
    f: impl FnOnce(&crate::sequencer::control_track::ControlTrack) -> Option<T>,
) -> Option<T> {
    let session = inner.session.as_ref()?;
    let control_track = session.control_track_provider()?.control_track()?;
    f(&control_track)
}

fn check_bar(session: &dyn PlaybackSession, bar: u32) -> PlaybackResult<()> {
    match session.bar_range() {
        Some(range) if !range.contains(bar) => Err(PlaybackError::IllegalArgument(format!(
            "Bar {} is outside of {}",
            bar, range
        ))),
        _ => Ok(()),
    }
}

/// Transport tick and beats from song start of the first beat of `bar`.
///
/// Starting from the first bar plays the precount, if any.
fn bar_tick(session: &dyn PlaybackSession, bar: u32) -> (u64, f32) {
    let Some(provider) = session.song_context_provider() else {
        return (session.loop_start_tick(), 0.0);
    };
    let context = provider.song_context();
    if bar <= context.bar_range().from {
        return (0, 0.0);
    }
    let position = Position::at_bar(bar);
    let tick = context.relative_tick(position).unwrap_or(0);
    let beats = context.position_in_beats(position).unwrap_or(0.0);
    (provider.song_start_tick() + tick, beats)
}

fn transport_error(e: TransportError) -> PlaybackError {
    PlaybackError::Generation(MusicGenerationError::new(format!("Transport error: {}", e)))
}
