/// beatgrid - a sample-based drum step sequencer
///
/// This library provides the playback core behind the beatgrid app:
/// - Grid store with lock-free snapshots for the playback thread
/// - Sample bank decoding WAV files and mixing voices through cpal
/// - Transport clock firing steps at sixteenth-note resolution
/// - Playback controller (play/pause/stop, loop, tempo, speed, volume)
/// - Pattern persistence, MIDI export and live MIDI output

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod persistence;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioOutput, DirectorySource, SampleBank};
pub use config::Config;
pub use midi::{generate_midi_file, MidiOutputDevice};
pub use sequencer::playback::{PlaybackEvent, TransportClock};
pub use sequencer::player::{PlayerSet, SamplePlayer, TriggerParams};
pub use sequencer::{Grid, Sequencer, TransportState};
