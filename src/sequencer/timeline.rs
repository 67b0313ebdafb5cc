// Timeline - Musical time representation
// Handles conversion between ticks, natural beats and bar/beat positions

use std::fmt;

/// Transport resolution: ticks per natural beat (PPQ)
pub const TICKS_PER_BEAT: u64 = 960;

/// Time signature (numerator/denominator)
/// Example: 4/4 time = TimeSignature { numerator: 4, denominator: 4 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,   // Natural beats per bar
    pub denominator: u8, // Note value (4 = quarter note, 8 = eighth note)
}

impl TimeSignature {
    /// Creates a new time signature
    pub fn new(numerator: u8, denominator: u8) -> Self {
        assert!(numerator > 0, "Time signature numerator must be > 0");
        assert!(
            denominator.is_power_of_two(),
            "Time signature denominator must be power of 2"
        );
        Self {
            numerator,
            denominator,
        }
    }

    pub fn four_four() -> Self {
        Self::new(4, 4)
    }

    pub fn three_four() -> Self {
        Self::new(3, 4)
    }

    pub fn six_eight() -> Self {
        Self::new(6, 8)
    }

    /// Number of natural beats per bar
    pub fn natural_beats(&self) -> u32 {
        self.numerator as u32
    }

    /// Ticks in one bar
    pub fn bar_ticks(&self) -> u64 {
        self.natural_beats() as u64 * TICKS_PER_BEAT
    }

    /// Bytes of a standard time signature meta message (0x58)
    pub fn to_meta_bytes(&self) -> [u8; 4] {
        let denominator_power = self.denominator.trailing_zeros() as u8;
        [self.numerator, denominator_power, 24, 8]
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tempo {
    bpm: f32,
}

impl Tempo {
    pub const MIN_BPM: f32 = 10.0;
    pub const MAX_BPM: f32 = 400.0;

    /// Creates a new tempo
    /// BPM must be in range [10.0, 400.0]
    pub fn new(bpm: f32) -> Self {
        assert!(
            (Self::MIN_BPM..=Self::MAX_BPM).contains(&bpm),
            "BPM must be between 10 and 400"
        );
        Self { bpm }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Duration of one beat in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm as f64
    }

    /// Microseconds per quarter note, as stored in a tempo meta message
    pub fn micros_per_quarter(&self) -> u32 {
        (60_000_000.0 / self.bpm as f64).round() as u32
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

/// Musical position: bar index (0-based) and beat within the bar (0-based, fractional)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub bar: u32,
    pub beat: f32,
}

impl Position {
    pub fn new(bar: u32, beat: f32) -> Self {
        Self { bar, beat }
    }

    /// Start of a bar
    pub fn at_bar(bar: u32) -> Self {
        Self::new(bar, 0.0)
    }

    /// True if the position is the first beat of its bar
    pub fn is_first_bar_beat(&self) -> bool {
        self.beat == 0.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Displayed 1-based like a score
        write!(f, "[{}:{}]", self.bar + 1, self.beat + 1.0)
    }
}

/// Convert a beat count into ticks
pub fn beats_to_ticks(beats: f32) -> u64 {
    (beats as f64 * TICKS_PER_BEAT as f64).round().max(0.0) as u64
}

/// Convert ticks into a beat count
pub fn ticks_to_beats(ticks: u64) -> f32 {
    (ticks as f64 / TICKS_PER_BEAT as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_signature() {
        let ts = TimeSignature::four_four();
        assert_eq!(ts.natural_beats(), 4);
        assert_eq!(ts.bar_ticks(), 4 * TICKS_PER_BEAT);
        assert_eq!(ts.to_string(), "4/4");
        assert_eq!(TimeSignature::six_eight().to_meta_bytes(), [6, 3, 24, 8]);
    }

    #[test]
    fn test_tempo() {
        let tempo = Tempo::new(120.0);
        assert_eq!(tempo.beat_duration_seconds(), 0.5);
        assert_eq!(tempo.micros_per_quarter(), 500_000);
    }

    #[test]
    #[should_panic]
    fn test_tempo_out_of_range() {
        Tempo::new(1000.0);
    }

    #[test]
    fn test_beats_ticks_conversion() {
        assert_eq!(beats_to_ticks(1.5), 1440);
        assert_eq!(ticks_to_beats(1920), 2.0);
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::new(0, 0.0).to_string(), "[1:1]");
        assert!(Position::at_bar(3).is_first_bar_beat());
        assert!(Position::new(1, 2.0) > Position::new(1, 1.5));
    }
}
