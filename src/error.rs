/// Error types for the library surface.
///
/// Nothing in the playback core propagates these into the transport: a failed
/// sample or a missing device degrades to silence. They exist so loaders and
/// collaborators can report what went wrong.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to create audio output: {0}")]
    ContextCreation(String),

    #[error("failed to decode sample `{name}`: {source}")]
    BufferDecode {
        name: String,
        #[source]
        source: hound::Error,
    },

    #[error("failed to load sample `{name}`: {reason}")]
    SampleLoad { name: String, reason: String },

    #[error("playback failed: {0}")]
    Playback(String),
}

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("failed to create MIDI output: {0}")]
    Init(#[from] midir::InitError),

    #[error("invalid MIDI port index {0}")]
    InvalidPort(usize),

    #[error("failed to connect to MIDI port: {0}")]
    Connect(String),

    #[error("failed to send MIDI message: {0}")]
    Send(#[from] midir::SendError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
