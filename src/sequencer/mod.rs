// Sequencer module
// Musical time, timed event sequences, the transport and the synthesized tracks

pub mod control_track;
pub mod metronome;
pub mod player;
pub mod sequence;
pub mod timeline;
pub mod transport;

pub use control_track::ControlTrack;
pub use sequence::{MidiEvent, MidiMessage, Sequence, Track};
pub use timeline::{Position, TICKS_PER_BEAT, Tempo, TimeSignature};
pub use transport::{SequencerPort, SoftSequencer, TransportError};
