/// Sample playback: decoded buffers, the sample bank, and the cpal output stage.
mod bank;
mod buffer;
mod mixer;
mod output;
mod source;

pub use bank::{Instrument, SampleBank};
pub use buffer::{decode_wav, SampleBuffer, StereoFrame};
pub use mixer::{AudioCommand, Mixer, MAX_VOICES};
pub use output::{gain_for_volume, AudioOutput, OutputHandle, OutputState};
pub use source::{format_sample_name, DirectorySource, SampleSource, SAMPLE_MAP_FILE};

#[cfg(test)]
pub(crate) use source::scratch_dir;
