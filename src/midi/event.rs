// MIDI short messages (channel voice messages)

use crate::error::MidiDataError;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const PITCH_BEND: u8 = 0xE0;

/// Controller number of "All Notes Off"
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Raw 3-byte MIDI message, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortMessage {
    status: u8,
    data1: u8,
    data2: u8,
}

impl ShortMessage {
    /// Build a channel message from command (upper nibble), channel and data bytes
    pub fn new(command: u8, channel: u8, data1: u8, data2: u8) -> Result<Self, MidiDataError> {
        if command < 0x80 || command >= 0xF0 || command & 0x0F != 0 {
            return Err(MidiDataError::InvalidStatus(command));
        }
        if channel > 15 {
            return Err(MidiDataError::InvalidChannel(channel));
        }
        if data1 > 127 {
            return Err(MidiDataError::InvalidData(data1));
        }
        if data2 > 127 {
            return Err(MidiDataError::InvalidData(data2));
        }
        Ok(Self {
            status: command | channel,
            data1,
            data2,
        })
    }

    pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> Result<Self, MidiDataError> {
        Self::new(NOTE_ON, channel, pitch, velocity)
    }

    pub fn note_off(channel: u8, pitch: u8) -> Result<Self, MidiDataError> {
        Self::new(NOTE_OFF, channel, pitch, 0)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Result<Self, MidiDataError> {
        Self::new(CONTROL_CHANGE, channel, controller, value)
    }

    /// Parse a raw MIDI message
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MidiDataError> {
        let status = *bytes
            .first()
            .ok_or_else(|| MidiDataError::InvalidMeta("empty message".into()))?;
        if bytes.len() < 2 {
            return Err(MidiDataError::InvalidStatus(status));
        }
        let data2 = bytes.get(2).copied().unwrap_or(0);
        Self::new(status & 0xF0, status & 0x0F, bytes[1], data2)
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn command(&self) -> u8 {
        self.status & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> u8 {
        self.data2
    }

    /// Wire bytes (program change carries a single data byte)
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.command() == PROGRAM_CHANGE {
            vec![self.status, self.data1]
        } else {
            vec![self.status, self.data1, self.data2]
        }
    }

    /// Classify the message for note/activity tracking
    pub fn kind(&self) -> ChannelEvent {
        let channel = self.channel();
        match self.command() {
            // Velocity 0 = Note Off
            NOTE_ON if self.data2 > 0 => ChannelEvent::NoteOn {
                channel,
                pitch: self.data1,
                velocity: self.data2,
            },
            NOTE_ON | NOTE_OFF => ChannelEvent::NoteOff {
                channel,
                pitch: self.data1,
            },
            CONTROL_CHANGE => ChannelEvent::ControlChange {
                channel,
                controller: self.data1,
                value: self.data2,
            },
            _ => ChannelEvent::Other { channel },
        }
    }
}

/// Decoded channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    Other { channel: u8 },
}
