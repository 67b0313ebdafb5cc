// MIDI meta messages
//
// Standard meta types plus private marker types used for synchronization.
// Markers are matched by their MarkerId, which never travels on the wire.

use crate::error::MidiDataError;
use std::sync::atomic::{AtomicU64, Ordering};

pub const META_COPYRIGHT: u8 = 0x02;
pub const META_TRACK_NAME: u8 = 0x03;
pub const META_MARKER: u8 = 0x06;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;
pub const META_TIME_SIGNATURE: u8 = 0x58;

/// Private: chord symbol change marker
pub const META_CHORD_SYMBOL: u8 = 0x60;
/// Private: natural beat position marker
pub const META_BEAT_POSITION: u8 = 0x61;
/// Private: song-part tempo factor change, data = factor in percent (2 bytes, big endian)
pub const META_TEMPO_FACTOR: u8 = 0x62;

/// Meta types kept at tick 0 when a precount shifts a sequence
pub const TICK_ZERO_PINNED_TYPES: [u8; 4] =
    [META_TRACK_NAME, META_TIME_SIGNATURE, META_TEMPO, META_COPYRIGHT];

/// Identity of a synchronization marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u64);

static NEXT_MARKER_ID: AtomicU64 = AtomicU64::new(1);

impl MarkerId {
    pub fn next() -> Self {
        Self(NEXT_MARKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaMessage {
    meta_type: u8,
    data: Vec<u8>,
    marker: Option<MarkerId>,
}

impl MetaMessage {
    pub fn new(meta_type: u8, data: Vec<u8>) -> Result<Self, MidiDataError> {
        if meta_type > 0x7F {
            return Err(MidiDataError::InvalidMeta(format!(
                "type 0x{meta_type:02X} out of range"
            )));
        }
        Ok(Self {
            meta_type,
            data,
            marker: None,
        })
    }

    /// Zero-length private marker with a fresh identity
    pub fn marker(meta_type: u8) -> Self {
        Self {
            meta_type,
            data: Vec::new(),
            marker: Some(MarkerId::next()),
        }
    }

    pub fn track_name(name: &str) -> Self {
        Self {
            meta_type: META_TRACK_NAME,
            data: name.as_bytes().to_vec(),
            marker: None,
        }
    }

    pub fn tempo(micros_per_quarter: u32) -> Self {
        let bytes = micros_per_quarter.to_be_bytes();
        Self {
            meta_type: META_TEMPO,
            data: bytes[1..].to_vec(),
            marker: None,
        }
    }

    pub fn time_signature(bytes: [u8; 4]) -> Self {
        Self {
            meta_type: META_TIME_SIGNATURE,
            data: bytes.to_vec(),
            marker: None,
        }
    }

    pub fn end_of_track() -> Self {
        Self {
            meta_type: META_END_OF_TRACK,
            data: Vec::new(),
            marker: None,
        }
    }

    /// Tempo factor marker, factor stored in percent
    pub fn tempo_factor(factor: f32) -> Result<Self, MidiDataError> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(MidiDataError::InvalidMeta(format!(
                "invalid tempo factor {factor}"
            )));
        }
        let percent = (factor * 100.0).round().min(u16::MAX as f32) as u16;
        Ok(Self {
            meta_type: META_TEMPO_FACTOR,
            data: percent.to_be_bytes().to_vec(),
            marker: None,
        })
    }

    pub fn meta_type(&self) -> u8 {
        self.meta_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn marker_id(&self) -> Option<MarkerId> {
        self.marker
    }

    /// Decode the factor of a tempo factor marker
    pub fn tempo_factor_value(&self) -> Option<f32> {
        if self.meta_type != META_TEMPO_FACTOR || self.data.len() != 2 {
            return None;
        }
        let percent = u16::from_be_bytes([self.data[0], self.data[1]]);
        Some(percent as f32 / 100.0)
    }

    pub fn text(&self) -> Option<String> {
        match self.meta_type {
            0x01..=0x0F => Some(String::from_utf8_lossy(&self.data).into_owned()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_have_distinct_identity() {
        let m1 = MetaMessage::marker(META_BEAT_POSITION);
        let m2 = MetaMessage::marker(META_BEAT_POSITION);
        assert_ne!(m1.marker_id(), m2.marker_id());
        assert_ne!(m1, m2);
        assert!(m1.data().is_empty());
    }

    #[test]
    fn test_tempo_factor_encoding() {
        let meta = MetaMessage::tempo_factor(0.85).unwrap();
        assert_eq!(meta.tempo_factor_value(), Some(0.85));
        assert!(MetaMessage::tempo_factor(0.0).is_err());
        assert_eq!(MetaMessage::track_name("x").tempo_factor_value(), None);
    }

    #[test]
    fn test_standard_messages() {
        let tempo = MetaMessage::tempo(500_000);
        assert_eq!(tempo.data(), &[0x07, 0xA1, 0x20]);
        assert_eq!(MetaMessage::track_name("Bass").text().as_deref(), Some("Bass"));
        assert!(MetaMessage::new(0x80, vec![]).is_err());
    }
}
