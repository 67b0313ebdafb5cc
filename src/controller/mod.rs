// Playback controller - transport ownership, state machine and listener dispatch

pub mod activity;
pub mod dispatch;
pub mod listener;
pub mod music_controller;

pub use listener::{NoteListener, PlaybackListener};
pub use music_controller::{
    ControlEvent, ControllerChange, ControllerState, LockToken, MusicController, PROP_PLAYBACK_SESSION, PROP_STATE,
};
