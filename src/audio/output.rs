/// Audio output using cpal
///
/// There is one output stage per process. `AudioOutput` owns the device
/// stream and must stay on the thread that created it; `OutputHandle` is the
/// cheap, thread-safe side that triggers voices and sets the master gain.
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::buffer::StereoFrame;
use super::mixer::{AudioCommand, Mixer};
use crate::error::AudioError;

const COMMAND_QUEUE: usize = 1024;
const MAX_BLOCK_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Running,
    /// Stream exists but renders silence and drops triggers until resumed.
    Suspended,
    /// No device could be opened; every trigger is a no-op.
    Unavailable,
}

impl OutputState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => OutputState::Running,
            1 => OutputState::Suspended,
            _ => OutputState::Unavailable,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OutputState::Running => 0,
            OutputState::Suspended => 1,
            OutputState::Unavailable => 2,
        }
    }
}

#[derive(Debug)]
struct OutputShared {
    state: AtomicU8,
    master_gain: AtomicU32,
}

impl OutputShared {
    fn new(state: OutputState, volume: f32) -> Self {
        Self {
            state: AtomicU8::new(state.as_u8()),
            master_gain: AtomicU32::new(gain_for_volume(volume).to_bits()),
        }
    }

    fn state(&self) -> OutputState {
        OutputState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }
}

/// Perceptual volume curve: gain = volume².
pub fn gain_for_volume(volume: f32) -> f32 {
    let v = volume.clamp(0.0, 1.0);
    v * v
}

#[derive(Clone, Debug)]
pub struct OutputHandle {
    tx: Option<Sender<AudioCommand>>,
    shared: Arc<OutputShared>,
}

impl OutputHandle {
    /// Handle with no device behind it.
    pub fn unavailable() -> Self {
        Self {
            tx: None,
            shared: Arc::new(OutputShared::new(OutputState::Unavailable, 0.0)),
        }
    }

    /// Handle feeding an arbitrary receiver instead of a device stream.
    pub fn detached(volume: f32) -> (Self, Receiver<AudioCommand>) {
        let (tx, rx) = crossbeam_channel::bounded(COMMAND_QUEUE);
        let handle = Self {
            tx: Some(tx),
            shared: Arc::new(OutputShared::new(OutputState::Running, volume)),
        };
        (handle, rx)
    }

    pub fn state(&self) -> OutputState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == OutputState::Running
    }

    /// Enqueues a command. Dropped silently when the output is not running
    /// or the queue is full.
    pub fn send(&self, cmd: AudioCommand) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("audio command queue full, dropping trigger");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared
            .master_gain
            .store(gain_for_volume(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        self.shared.master_gain()
    }

    pub fn resume(&self) {
        let _ = self.shared.state.compare_exchange(
            OutputState::Suspended.as_u8(),
            OutputState::Running.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn suspend(&self) {
        let _ = self.shared.state.compare_exchange(
            OutputState::Running.as_u8(),
            OutputState::Suspended.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Owner of the device stream. Dropping it closes the device and marks every
/// outstanding handle unavailable.
pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    handle: OutputHandle,
}

impl AudioOutput {
    /// Opens the default output device. The stream starts suspended, the
    /// first user-initiated playback resumes it. When no device can be
    /// opened the output is `Unavailable` instead of an error.
    pub fn open(volume: f32) -> Self {
        match Self::try_open(volume) {
            Ok(output) => output,
            Err(e) => {
                log::warn!("{e}; playback will be silent");
                Self {
                    _stream: None,
                    handle: OutputHandle::unavailable(),
                }
            }
        }
    }

    fn try_open(volume: f32) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::ContextCreation("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::ContextCreation(e.to_string()))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::ContextCreation(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let (tx, rx) = crossbeam_channel::bounded(COMMAND_QUEUE);
        let shared = Arc::new(OutputShared::new(OutputState::Suspended, volume));

        let stream = build_output_stream(&device, &config.into(), rx, Arc::clone(&shared), sample_rate, channels)?;
        stream
            .play()
            .map_err(|e| AudioError::ContextCreation(e.to_string()))?;

        log::info!("audio output open: {sample_rate} Hz, {channels} channels");
        Ok(Self {
            _stream: Some(stream),
            handle: OutputHandle { tx: Some(tx), shared },
        })
    }

    pub fn handle(&self) -> OutputHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> OutputState {
        self.handle.state()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.handle
            .shared
            .state
            .store(OutputState::Unavailable.as_u8(), Ordering::Release);
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: Receiver<AudioCommand>,
    shared: Arc<OutputShared>,
    sample_rate: u32,
    channels: usize,
) -> Result<cpal::Stream, AudioError> {
    let mut mixer = Mixer::new(sample_rate);
    let mut block = vec![StereoFrame::default(); MAX_BLOCK_FRAMES];

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let running = shared.state() == OutputState::Running;
                while let Ok(cmd) = rx.try_recv() {
                    if running {
                        mixer.handle_cmd(cmd);
                    }
                }
                if !running {
                    mixer.handle_cmd(AudioCommand::Silence);
                    data.fill(0.0);
                    return;
                }

                let gain = shared.master_gain();
                for chunk in data.chunks_mut(MAX_BLOCK_FRAMES * channels.max(1)) {
                    let frames = chunk.len() / channels.max(1);
                    let block = &mut block[..frames];
                    mixer.render_block(block, gain);
                    write_interleaved(block, chunk, channels);
                }
            },
            |err| log::error!("{}", AudioError::Playback(err.to_string())),
            None,
        )
        .map_err(|e| AudioError::ContextCreation(e.to_string()))
}

fn write_interleaved(block: &[StereoFrame], out: &mut [f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            for (sample, frame) in out.iter_mut().zip(block) {
                *sample = 0.5 * (frame.left + frame.right);
            }
        }
        _ => {
            for (slot, frame) in out.chunks_exact_mut(channels).zip(block) {
                slot[0] = frame.left;
                slot[1] = frame.right;
                slot[2..].fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_curve() {
        assert_eq!(gain_for_volume(0.5), 0.25);
        assert_eq!(gain_for_volume(1.0), 1.0);
        assert_eq!(gain_for_volume(1.5), 1.0);
        assert_eq!(gain_for_volume(-0.2), 0.0);
    }

    #[test]
    fn test_unavailable_handle_drops_commands() {
        let handle = OutputHandle::unavailable();
        assert_eq!(handle.state(), OutputState::Unavailable);
        assert!(!handle.send(AudioCommand::Silence));
        handle.resume();
        assert_eq!(handle.state(), OutputState::Unavailable);
    }

    #[test]
    fn test_suspend_and_resume() {
        let (handle, rx) = OutputHandle::detached(0.8);
        handle.suspend();
        assert!(!handle.send(AudioCommand::Silence));
        assert!(rx.try_recv().is_err());
        handle.resume();
        assert!(handle.send(AudioCommand::Silence));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_master_gain_tracks_volume() {
        let (handle, _rx) = OutputHandle::detached(0.8);
        assert!((handle.master_gain() - 0.64).abs() < 1e-6);
        handle.set_volume(0.5);
        assert_eq!(handle.master_gain(), 0.25);
    }

    #[test]
    fn test_write_interleaved_mono_and_multichannel() {
        let block = [StereoFrame { left: 1.0, right: 0.0 }];
        let mut mono = [9.0];
        write_interleaved(&block, &mut mono, 1);
        assert_eq!(mono, [0.5]);

        let mut quad = [9.0; 4];
        write_interleaved(&block, &mut quad, 4);
        assert_eq!(quad, [1.0, 0.0, 0.0, 0.0]);
    }
}
