// Song model consumed by the playback core
//
// The editors own the song; the playback core only reads bar ranges, time
// signatures, tempo and chord symbol occurrences from it.

use crate::error::{PlaybackError, PlaybackResult};
use crate::sequencer::timeline::{Position, TICKS_PER_BEAT, Tempo, TimeSignature, beats_to_ticks};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Inclusive range of bar indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BarRange {
    pub from: u32,
    pub to: u32,
}

impl BarRange {
    /// None if `from` is after `to`
    pub fn new(from: u32, to: u32) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    pub fn contains(&self, bar: u32) -> bool {
        (self.from..=self.to).contains(&bar)
    }

    /// Number of bars
    pub fn size(&self) -> u32 {
        self.to - self.from + 1
    }

    pub fn intersect(&self, other: &BarRange) -> Option<BarRange> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        BarRange::new(from, to)
    }
}

impl fmt::Display for BarRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.from, self.to)
    }
}

/// A section occurrence in the song structure
#[derive(Debug, Clone, PartialEq)]
pub struct SongPart {
    pub name: String,
    pub start_bar: u32,
    pub nb_bars: u32,
    pub time_signature: TimeSignature,
    /// Song-part local tempo override, 1.0 = song tempo
    pub tempo_factor: f32,
}

impl SongPart {
    pub fn new(name: impl Into<String>, start_bar: u32, nb_bars: u32, time_signature: TimeSignature) -> Self {
        assert!(nb_bars > 0, "Song part must have at least 1 bar");
        Self {
            name: name.into(),
            start_bar,
            nb_bars,
            time_signature,
            tempo_factor: 1.0,
        }
    }

    pub fn with_tempo_factor(mut self, tempo_factor: f32) -> Self {
        self.tempo_factor = tempo_factor;
        self
    }

    pub fn bar_range(&self) -> BarRange {
        BarRange {
            from: self.start_bar,
            to: self.start_bar + self.nb_bars - 1,
        }
    }
}

static NEXT_CHORD_ID: AtomicU64 = AtomicU64::new(1);

/// A chord symbol occurrence, as produced by the chord sequence builder
/// (substitutions and aliases already resolved)
#[derive(Debug, Clone, PartialEq)]
pub struct ChordSymbolItem {
    id: u64,
    pub name: String,
    pub position: Position,
}

impl ChordSymbolItem {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            id: NEXT_CHORD_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            position,
        }
    }

    /// Identity of the originating chord symbol
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub name: String,
    pub tempo: Tempo,
    /// Contiguous song parts, in bar order
    pub parts: Vec<SongPart>,
    pub chords: Vec<ChordSymbolItem>,
}

impl Song {
    pub fn new(name: impl Into<String>, tempo: Tempo) -> Self {
        Self {
            name: name.into(),
            tempo,
            parts: Vec::new(),
            chords: Vec::new(),
        }
    }

    /// Append a song part right after the last one
    pub fn add_part(&mut self, name: impl Into<String>, nb_bars: u32, time_signature: TimeSignature) -> &mut SongPart {
        let start_bar = self.size_in_bars();
        self.parts.push(SongPart::new(name, start_bar, nb_bars, time_signature));
        let last = self.parts.len() - 1;
        &mut self.parts[last]
    }

    pub fn add_chord(&mut self, name: impl Into<String>, position: Position) {
        self.chords.push(ChordSymbolItem::new(name, position));
    }

    pub fn size_in_bars(&self) -> u32 {
        self.parts.last().map(|p| p.start_bar + p.nb_bars).unwrap_or(0)
    }

    pub fn bar_range(&self) -> Option<BarRange> {
        let size = self.size_in_bars();
        size.checked_sub(1).and_then(|last| BarRange::new(0, last))
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A song and the bar range to play.
///
/// Two contexts are equal only if they come from the same construction (or a clone
/// of it): every request for music is a distinct context.
#[derive(Debug, Clone)]
pub struct SongContext {
    id: u64,
    song: Arc<Song>,
    bar_range: BarRange,
}

impl PartialEq for SongContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SongContext {}

impl SongContext {
    /// Context over `bar_range`, or the whole song if None.
    ///
    /// Fails if the song is empty or the range is outside the song.
    pub fn new(song: Arc<Song>, bar_range: Option<BarRange>) -> PlaybackResult<Self> {
        let whole = song.bar_range().ok_or_else(|| {
            PlaybackError::IllegalArgument(format!("Song {} has no song part", song.name))
        })?;
        let bar_range = bar_range.unwrap_or(whole);
        if !whole.contains(bar_range.from) || !whole.contains(bar_range.to) {
            return Err(PlaybackError::IllegalArgument(format!(
                "Bar range {} outside of song {}",
                bar_range, whole
            )));
        }
        Ok(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            song,
            bar_range,
        })
    }

    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    pub fn bar_range(&self) -> BarRange {
        self.bar_range
    }

    /// Song parts which intersect the bar range, in bar order
    pub fn song_parts(&self) -> impl Iterator<Item = &SongPart> {
        let range = self.bar_range;
        self.song
            .parts
            .iter()
            .filter(move |p| p.bar_range().intersect(&range).is_some())
    }

    /// Bars of `part` included in the context
    pub fn part_bar_range(&self, part: &SongPart) -> Option<BarRange> {
        part.bar_range().intersect(&self.bar_range)
    }

    pub fn song_part_at(&self, bar: u32) -> Option<&SongPart> {
        if !self.bar_range.contains(bar) {
            return None;
        }
        self.song_parts().find(|p| p.bar_range().contains(bar))
    }

    /// Ticks from the start of the bar range to `pos`, None if out of range
    pub fn relative_tick(&self, pos: Position) -> Option<u64> {
        if !self.bar_range.contains(pos.bar) {
            return None;
        }
        let mut tick = 0;
        for part in self.song_parts() {
            let range = self.part_bar_range(part)?;
            let ts = part.time_signature;
            if range.contains(pos.bar) {
                let bars = (pos.bar - range.from) as u64;
                return Some(tick + bars * ts.bar_ticks() + beats_to_ticks(pos.beat));
            }
            tick += range.size() as u64 * ts.bar_ticks();
        }
        None
    }

    /// Natural beats from the start of the bar range to `pos`
    pub fn position_in_beats(&self, pos: Position) -> Option<f32> {
        self.relative_tick(pos)
            .map(|t| (t as f64 / TICKS_PER_BEAT as f64) as f32)
    }

    /// Total length of the context in ticks
    pub fn tick_length(&self) -> u64 {
        self.song_parts()
            .filter_map(|p| {
                self.part_bar_range(p)
                    .map(|r| r.size() as u64 * p.time_signature.bar_ticks())
            })
            .sum()
    }

    /// Chord symbols within the bar range, in position order.
    ///
    /// The chord still sounding when the range starts is included, moved to the
    /// first beat of the range.
    pub fn chord_symbols(&self) -> Vec<ChordSymbolItem> {
        let by_position = |a: &&ChordSymbolItem, b: &&ChordSymbolItem| {
            a.position
                .partial_cmp(&b.position)
                .unwrap_or(std::cmp::Ordering::Equal)
        };
        let mut chords: Vec<&ChordSymbolItem> = self
            .song
            .chords
            .iter()
            .filter(|c| self.bar_range.contains(c.position.bar))
            .collect();
        chords.sort_by(by_position);

        let start = Position::at_bar(self.bar_range.from);
        let mut result = Vec::with_capacity(chords.len() + 1);
        if chords.first().is_none_or(|c| c.position != start) {
            let active = self
                .song
                .chords
                .iter()
                .filter(|c| c.position.bar < self.bar_range.from)
                .max_by(by_position);
            if let Some(active) = active {
                let mut chord = active.clone();
                chord.position = start;
                result.push(chord);
            }
        }
        result.extend(chords.into_iter().cloned());
        result
    }

    pub fn tempo(&self) -> Tempo {
        self.song.tempo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> Arc<Song> {
        let mut song = Song::new("Autumn", Tempo::new(120.0));
        song.add_part("A", 4, TimeSignature::four_four());
        song.add_part("B", 2, TimeSignature::three_four());
        song.add_part("C", 2, TimeSignature::four_four())
            .tempo_factor = 0.5;
        song.add_chord("Cm7", Position::new(0, 0.0));
        song.add_chord("F7", Position::new(4, 1.5));
        Arc::new(song)
    }

    #[test]
    fn test_bar_range() {
        let r = BarRange::new(2, 5).unwrap();
        assert_eq!(r.size(), 4);
        assert!(r.contains(5));
        assert!(!r.contains(6));
        assert_eq!(r.intersect(&BarRange::new(4, 9).unwrap()), BarRange::new(4, 5));
        assert_eq!(r.intersect(&BarRange::new(6, 9).unwrap()), None);
        assert_eq!(BarRange::new(3, 2), None);
    }

    #[test]
    fn test_relative_tick_across_time_signatures() {
        let ctx = SongContext::new(song(), None).unwrap();
        let bar_44 = 4 * TICKS_PER_BEAT;
        let bar_34 = 3 * TICKS_PER_BEAT;
        assert_eq!(ctx.relative_tick(Position::at_bar(0)), Some(0));
        assert_eq!(ctx.relative_tick(Position::at_bar(4)), Some(4 * bar_44));
        assert_eq!(
            ctx.relative_tick(Position::new(5, 2.0)),
            Some(4 * bar_44 + bar_34 + 2 * TICKS_PER_BEAT)
        );
        assert_eq!(ctx.tick_length(), 6 * bar_44 + 2 * bar_34);
        assert_eq!(ctx.relative_tick(Position::at_bar(8)), None);
    }

    #[test]
    fn test_sub_range_context() {
        let ctx = SongContext::new(song(), BarRange::new(3, 5)).unwrap();
        assert_eq!(ctx.song_parts().count(), 2);
        assert_eq!(ctx.relative_tick(Position::at_bar(3)), Some(0));
        assert_eq!(ctx.position_in_beats(Position::at_bar(5)), Some(7.0));
        assert_eq!(ctx.song_part_at(4).map(|p| p.name.as_str()), Some("B"));
        assert!(ctx.song_part_at(1).is_none());

        // Cm7 is still sounding at bar 3
        let chords = ctx.chord_symbols();
        let names: Vec<(&str, Position)> = chords.iter().map(|c| (c.name.as_str(), c.position)).collect();
        assert_eq!(names, vec![("Cm7", Position::at_bar(3)), ("F7", Position::new(4, 1.5))]);
    }

    #[test]
    fn test_invalid_context() {
        let empty = Arc::new(Song::new("Empty", Tempo::new(120.0)));
        assert!(matches!(SongContext::new(empty, None), Err(PlaybackError::IllegalArgument(_))));
        assert!(SongContext::new(song(), BarRange::new(6, 8)).is_err());
        assert!(SongContext::new(song(), BarRange::new(0, 7)).is_ok());
    }

    #[test]
    fn test_context_identity() {
        let s = song();
        let a = SongContext::new(Arc::clone(&s), None).unwrap();
        let b = SongContext::new(s, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
