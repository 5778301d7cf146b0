use std::sync::Arc;

use super::buffer::{SampleBuffer, StereoFrame};

pub const MAX_VOICES: usize = 32; // hard cap so the callback never allocates

#[derive(Clone, Debug)]
pub enum AudioCommand {
    /// Start a new, independent voice for `buffer`.
    Trigger {
        buffer: Arc<SampleBuffer>,
        gain: f32,
        playback_rate: f32,
    },
    /// Cut every sounding voice.
    Silence,
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

#[derive(Clone, Debug)]
struct Voice {
    buffer: Arc<SampleBuffer>,
    pos: f64,
    step: f64,
    gain: f32,
}

impl Voice {
    // fraction of the sample already played, used for stealing
    fn progress(&self) -> f64 {
        self.pos / self.buffer.len().max(1) as f64
    }

    // returns false once the voice ran off the end of its buffer
    fn render_into(&mut self, out: &mut [StereoFrame]) -> bool {
        let data = &self.buffer.frames;
        for frame in out.iter_mut() {
            let i = self.pos as usize;
            if i >= data.len() {
                return false;
            }
            let frac = (self.pos - i as f64) as f32;
            let s0 = data[i];
            let s1 = data.get(i + 1).copied().unwrap_or(s0);
            frame.left += lerp(s0.left, s1.left, frac) * self.gain;
            frame.right += lerp(s0.right, s1.right, frac) * self.gain;
            self.pos += self.step;
        }
        (self.pos as usize) < data.len()
    }
}

/// Sums every live voice into the output block, then applies master gain.
pub struct Mixer {
    sample_rate: f32,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            voices: Vec::with_capacity(MAX_VOICES),
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::Trigger {
                buffer,
                gain,
                playback_rate,
            } => self.trigger_voice(buffer, gain, playback_rate),
            AudioCommand::Silence => self.voices.clear(),
        }
    }

    fn trigger_voice(&mut self, buffer: Arc<SampleBuffer>, gain: f32, playback_rate: f32) {
        if buffer.is_empty() || self.sample_rate <= 0.0 {
            return;
        }
        let step = buffer.sample_rate as f64 / self.sample_rate as f64 * playback_rate.max(0.0) as f64;
        let voice = Voice {
            buffer,
            pos: 0.0,
            step,
            gain,
        };

        if self.voices.len() < MAX_VOICES {
            self.voices.push(voice);
            return;
        }

        // pool is full: steal the voice closest to finishing
        if let Some(slot) = self
            .voices
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.progress().total_cmp(&b.progress()))
            .map(|(i, _)| i)
        {
            self.voices[slot] = voice;
        }
    }

    /// Renders one block. `master_gain` is applied after summing.
    pub fn render_block(&mut self, out: &mut [StereoFrame], master_gain: f32) {
        out.fill(StereoFrame::default());
        self.voices.retain_mut(|voice| voice.render_into(out));
        for frame in out.iter_mut() {
            frame.left *= master_gain;
            frame.right *= master_gain;
        }
    }
}
