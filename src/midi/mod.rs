// MIDI module - messages and output device

pub mod event;
pub mod meta;
pub mod output;

pub use event::{ChannelEvent, ShortMessage};
pub use meta::{MarkerId, MetaMessage};
pub use output::{MidiSink, OutputSynthManager};
