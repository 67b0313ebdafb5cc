//! Sequence construction: control track, click, precount and the song session layout

mod common;

use common::{BassGenerator, context, song, sub_context};
use jjazz_playback::midi::meta::{META_BEAT_POSITION, META_COPYRIGHT, META_MARKER, META_TEMPO_FACTOR};
use jjazz_playback::midi::{ChannelEvent, MetaMessage, ShortMessage};
use jjazz_playback::sequencer::control_track::CONTROL_TRACK_NAME;
use jjazz_playback::sequencer::metronome::{
    CLICK_TRACK_NAME, ClickSound, PRECOUNT_TRACK_NAME, PrecountMode, add_precount_click_track,
};
use jjazz_playback::sequencer::{ControlTrack, MidiEvent, Position, Sequence, TICKS_PER_BEAT, Tempo, TimeSignature};
use jjazz_playback::session::{PlaybackSession, SessionContext, SessionState, SongPlaybackSession};
use jjazz_playback::settings::{PlaybackPreferences, PlaybackSettings};
use jjazz_playback::song::{BarRange, Song, SongContext};
use rand::Rng;
use std::sync::Arc;

#[test]
fn test_control_track_has_one_marker_per_beat() {
    for nb_bars in [1, 4, 13] {
        let ctx = context(nb_bars, 120.0);
        let ct = ControlTrack::new(&ctx, 3);
        assert_eq!(ct.nb_position_markers(), nb_bars as usize * 4);

        let mut expected = Vec::new();
        for bar in 0..nb_bars {
            for beat in 0..4 {
                expected.push(Position::new(bar, beat as f32));
            }
        }
        let decoded: Vec<Position> = ct
            .midi_events()
            .iter()
            .filter_map(|e| e.message.as_meta())
            .filter(|m| m.meta_type() == META_BEAT_POSITION)
            .filter_map(|m| ct.position(m))
            .collect();
        assert_eq!(decoded, expected);
    }
}

#[test]
fn test_control_track_on_sub_range() {
    let ctx = sub_context(8, 3, 4);
    let ct = ControlTrack::new(&ctx, 0);
    assert_eq!(ct.nb_position_markers(), 8);
    assert_eq!(ct.nb_chord_markers(), 2);

    let first = ct.midi_events()[0].message.as_meta().unwrap();
    assert_eq!(ct.position(first), Some(Position::at_bar(3)));
    assert_eq!(ct.position_in_beats(first), Some(0.0));
}

#[test]
fn test_control_track_on_sub_range_gets_sounding_chord() {
    let mut song = Song::new("Sparse", Tempo::new(120.0));
    song.add_part("A", 8, TimeSignature::four_four());
    song.add_chord("C7", Position::at_bar(0));
    song.add_chord("F7", Position::at_bar(6));
    let ctx = SongContext::new(Arc::new(song), BarRange::new(2, 5)).unwrap();
    let ct = ControlTrack::new(&ctx, 0);
    assert_eq!(ct.nb_chord_markers(), 1);

    let (tick, chord) = ct
        .midi_events()
        .iter()
        .find_map(|e| e.message.as_meta().and_then(|m| ct.chord_symbol(m)).map(|c| (e.tick, c)))
        .unwrap();
    assert_eq!(chord.name, "C7");
    assert_eq!(chord.position, Position::at_bar(2));
    assert!(tick < TICKS_PER_BEAT);
}

#[test]
fn test_precount_shift_preserves_order() {
    let mut rng = rand::thread_rng();
    let ctx = context(4, 120.0);

    for _ in 0..20 {
        let mut sequence = Sequence::new();
        let index = sequence.create_track();
        let track = sequence.track_mut(index).unwrap();
        track.add(MidiEvent::meta(0, MetaMessage::track_name("Piano")));
        track.add(MidiEvent::meta(0, MetaMessage::tempo(500_000)));
        track.add(MidiEvent::meta(0, MetaMessage::time_signature([4, 2, 24, 8])));
        track.add(MidiEvent::meta(0, MetaMessage::new(META_COPYRIGHT, b"(c)".to_vec()).unwrap()));
        track.add(MidiEvent::meta(0, MetaMessage::new(META_MARKER, b"intro".to_vec()).unwrap()));
        for _ in 0..200 {
            // Few distinct ticks so that many events share a tick
            let tick = rng.gen_range(0..16u64) * TICKS_PER_BEAT / 2;
            let pitch = rng.gen_range(0..128u8);
            let msg = ShortMessage::note_on(0, pitch, rng.gen_range(1..128u8)).unwrap();
            track.add(MidiEvent::short(tick, msg));
        }
        let before = sequence.track(index).unwrap().events().to_vec();

        let start = add_precount_click_track(&mut sequence, &ctx, &ClickSound::default(), PrecountMode::OneBar);
        assert_eq!(start, 4 * TICKS_PER_BEAT);

        let after = sequence.track(index).unwrap().events();
        assert_eq!(after.len(), before.len());
        let pinned = 4;
        assert!(after[..pinned].iter().all(|e| e.tick == 0));
        assert_eq!(&after[..pinned], &before[..pinned]);

        // Every other event moved by exactly `start`, in the same order
        let moved: Vec<(u64, _)> = before[pinned..].iter().map(|e| (e.tick + start, &e.message)).collect();
        let actual: Vec<(u64, _)> = after[pinned..].iter().map(|e| (e.tick, &e.message)).collect();
        assert_eq!(actual, moved);
        assert!(after.windows(2).all(|w| w[0].tick <= w[1].tick));

        let precount = sequence.tracks().last().unwrap();
        assert_eq!(precount.name().as_deref(), Some(PRECOUNT_TRACK_NAME));
        assert!(precount.tick_length() < start);
    }
}

#[test]
fn test_auto_precount_depends_on_tempo() {
    let sound = ClickSound::default();
    for (bpm, ts, expected_bars) in [
        (90.0, TimeSignature::four_four(), 1),
        (140.0, TimeSignature::four_four(), 2),
        (60.0, TimeSignature::three_four(), 2),
        (50.0, TimeSignature::three_four(), 1),
    ] {
        let mut song = Song::new("Precount", Tempo::new(bpm));
        song.add_part("A", 2, ts);
        let ctx = SongContext::new(Arc::new(song), None).unwrap();
        let mut sequence = Sequence::new();
        let start = add_precount_click_track(&mut sequence, &ctx, &sound, PrecountMode::Auto);
        assert_eq!(start, expected_bars * ts.bar_ticks(), "{} BPM {}", bpm, ts);
    }
}

fn session_with(prefs: PlaybackPreferences, ctx: SongContext) -> (Arc<SongPlaybackSession>, Arc<PlaybackSettings>) {
    let settings = PlaybackSettings::new(prefs);
    let session = SongPlaybackSession::new(ctx, SessionContext::Song, BassGenerator::new(), Arc::clone(&settings));
    (session, settings)
}

#[test]
fn test_session_sequence_layout() {
    let prefs = PlaybackPreferences {
        click_enabled: true,
        precount_enabled: true,
        precount_mode: PrecountMode::TwoBars,
        ..Default::default()
    };
    let (session, _settings) = session_with(prefs, context(4, 120.0));
    assert_eq!(session.state(), SessionState::New);
    assert!(session.sequence().is_none());

    session.generate(true).unwrap();
    assert_eq!(session.state(), SessionState::Generated);
    let sequence = session.sequence().unwrap();
    let names: Vec<Option<String>> = sequence.tracks().iter().map(|t| t.name()).collect();
    assert_eq!(
        names,
        vec![
            Some("Blues".to_string()),
            Some("Bass".to_string()),
            Some(CONTROL_TRACK_NAME.to_string()),
            Some(CLICK_TRACK_NAME.to_string()),
            Some(PRECOUNT_TRACK_NAME.to_string()),
        ]
    );

    let song_start = 2 * 4 * TICKS_PER_BEAT;
    assert_eq!(session.loop_start_tick(), song_start);
    assert_eq!(session.loop_end_tick(), (song_start + 4 * 4 * TICKS_PER_BEAT) as i64);
    assert_eq!(session.phrase_track("Bass"), Some(1));
    assert_eq!(session.tracks_mute_status().get(&1), Some(&false));

    // First bass note starts with the song
    let first_note = sequence.tracks()[1]
        .events()
        .iter()
        .find(|e| matches!(e.message.as_short().map(|m| m.kind()), Some(ChannelEvent::NoteOn { .. })))
        .unwrap();
    assert_eq!(first_note.tick, song_start);

    let provider = session.song_context_provider().unwrap();
    assert_eq!(provider.song_start_tick(), song_start);
    assert!(session.control_track_provider().unwrap().is_control_track_enabled());

    assert!(session.generate(true).is_err());
}

#[test]
fn test_tempo_factor_markers_at_part_changes() {
    let mut song = Song::new("Parts", Tempo::new(120.0));
    song.add_part("A", 2, TimeSignature::four_four());
    song.add_part("B", 2, TimeSignature::four_four()).tempo_factor = 0.5;
    song.add_part("C", 2, TimeSignature::four_four()).tempo_factor = 0.5;
    song.add_part("D", 1, TimeSignature::three_four());
    let ctx = SongContext::new(Arc::new(song), None).unwrap();
    let (session, _settings) = session_with(PlaybackPreferences::default(), ctx);
    session.generate(true).unwrap();

    let sequence = session.sequence().unwrap();
    let markers: Vec<(u64, f32)> = sequence.tracks()[0]
        .events()
        .iter()
        .filter_map(|e| {
            let meta = e.message.as_meta()?;
            (meta.meta_type() == META_TEMPO_FACTOR).then(|| (e.tick, meta.tempo_factor_value().unwrap()))
        })
        .collect();
    let bar = 4 * TICKS_PER_BEAT;
    assert_eq!(markers, vec![(0, 1.0), (2 * bar, 0.5), (6 * bar, 1.0)]);
}

#[test]
fn test_preference_changes_make_session_dirty() {
    let (session, settings) = session_with(PlaybackPreferences::default(), context(2, 120.0));

    // Not generated yet: nothing to invalidate
    settings.set_click_enabled(true);
    assert!(!session.is_dirty());

    session.generate(true).unwrap();
    settings.set_loop_count(5);
    assert!(!session.is_dirty());
    assert_eq!(session.loop_count(), 5);

    settings.set_click_enabled(false);
    assert!(session.is_dirty());
}

#[test]
fn test_closed_session_releases_sequence() {
    let (session, _settings) = session_with(PlaybackPreferences::default(), context(2, 120.0));
    session.generate(true).unwrap();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.sequence().is_none());
    assert!(session.generate(true).is_err());
}

#[test]
fn test_bar_range_of_sub_context_session() {
    let ctx = SongContext::new(song(8, 120.0), BarRange::new(2, 5)).unwrap();
    let (session, _settings) = session_with(PlaybackPreferences::default(), ctx);
    assert_eq!(session.bar_range(), BarRange::new(2, 5));
}
