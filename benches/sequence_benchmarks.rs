use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use jjazz_playback::sequencer::metronome::{ClickSound, PrecountMode, add_click_track, add_precount_click_track};
use jjazz_playback::sequencer::player::{LoopSettings, SequencePlayer};
use jjazz_playback::sequencer::{ControlTrack, Position, Sequence, Tempo, TimeSignature};
use jjazz_playback::song::{Song, SongContext};
use std::collections::HashSet;
use std::sync::Arc;

fn context(nb_bars: u32) -> SongContext {
    let mut song = Song::new("Bench", Tempo::new(120.0));
    song.add_part("A", nb_bars / 2, TimeSignature::four_four());
    song.add_part("B", nb_bars - nb_bars / 2, TimeSignature::three_four());
    for bar in 0..nb_bars {
        song.add_chord("Dm7", Position::at_bar(bar));
        song.add_chord("G7", Position::new(bar, 2.0));
    }
    SongContext::new(Arc::new(song), None).expect("bench song has song parts")
}

/// Control track construction (done on every session generation)
fn bench_control_track(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_track");
    for nb_bars in [32, 128, 512] {
        let ctx = context(nb_bars);
        group.bench_with_input(BenchmarkId::from_parameter(nb_bars), &ctx, |b, ctx| {
            b.iter(|| black_box(ControlTrack::new(ctx, 1)));
        });
    }
    group.finish();
}

/// Precount shift of a sequence holding a click track
fn bench_precount_shift(c: &mut Criterion) {
    let mut group = c.benchmark_group("precount_shift");
    let sound = ClickSound::default();
    for nb_bars in [32, 128, 512] {
        let ctx = context(nb_bars);
        let mut sequence = Sequence::new();
        add_click_track(&mut sequence, &ctx, &sound);
        let index = sequence.create_track();
        if let Some(track) = sequence.track_mut(index) {
            ControlTrack::new(&ctx, index).fill_track(track);
        }

        group.bench_with_input(BenchmarkId::from_parameter(nb_bars), &sequence, |b, sequence| {
            b.iter(|| {
                let mut copy = sequence.clone();
                black_box(add_precount_click_track(&mut copy, &ctx, &sound, PrecountMode::TwoBars))
            });
        });
    }
    group.finish();
}

/// Playback clock: collect due events for a whole song in 2ms steps at 120 BPM
fn bench_player_advance(c: &mut Criterion) {
    let ctx = context(64);
    let mut sequence = Sequence::new();
    add_click_track(&mut sequence, &ctx, &ClickSound::default());
    let sequence = Arc::new(sequence);
    let muted = HashSet::new();
    let loop_settings = LoopSettings::default();
    // 2ms at 120 BPM, 960 ticks per beat
    let delta = 2.0 * 960.0 * 2.0 / 1000.0;

    c.bench_function("player_advance_64_bars", |b| {
        b.iter(|| {
            let mut player = SequencePlayer::new();
            player.set_sequence(Some(Arc::clone(&sequence)));
            loop {
                let advance = player.advance(delta, &loop_settings, &muted);
                black_box(&advance.events);
                if advance.finished {
                    break;
                }
            }
        });
    });
}

criterion_group!(benches, bench_control_track, bench_precount_shift, bench_player_advance);
criterion_main!(benches);
