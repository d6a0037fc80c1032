/// beatgrid - a step-sequencer drum machine library
///
/// This library provides the core of a beat matrix drum machine:
/// - A matrix of toggleable cells, one row per sound, one column per beat
/// - A clock that advances the current beat at a fixed interval
/// - Playback logic that fires a cell's sound when it is active on the current beat
/// - Audio and MIDI outputs that play those triggers

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;
pub mod session;

// Re-export commonly used types
pub use audio::{AudioOutput, VoiceTrigger};
pub use config::SessionConfig;
pub use error::{Result, SequencerError};
pub use midi::{midi_note_name, MidiOutputDevice};
pub use sequencer::playback::{
    dispatch, should_play, NullTrigger, PlaybackEngine, PlaybackEvent, RecordingTrigger,
    SoundTrigger,
};
pub use sequencer::{Cell, Clock, ClockState, Matrix, Sound, SoundHandle, SoundTable};
pub use session::{
    lock_session, CellAppearance, CellView, Session, SharedSession, Snapshot,
};
