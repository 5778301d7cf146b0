use std::sync::Arc;

use rayon::prelude::*;

use super::buffer::{decode_wav, SampleBuffer};
use super::mixer::AudioCommand;
use super::output::OutputHandle;
use super::source::SampleSource;
use crate::error::AudioError;
use crate::sequencer::player::{SamplePlayer, TriggerParams};

/// One row's instrument.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub name: String,
    pub buffer: Arc<SampleBuffer>,
    /// False when loading failed and `buffer` is the silent placeholder.
    pub loaded: bool,
}

/// Decoded samples keyed by row index, plus the output they play through.
pub struct SampleBank {
    instruments: Vec<Instrument>,
    output: OutputHandle,
}

impl SampleBank {
    pub fn empty(output: OutputHandle) -> Self {
        Self {
            instruments: Vec::new(),
            output,
        }
    }

    /// Loads every instrument the source lists. Only a failure to list the
    /// instruments is an error; individual samples fall back to silence.
    pub fn load<S: SampleSource + ?Sized>(source: &S, output: OutputHandle) -> anyhow::Result<Self> {
        let map = source.sample_map()?;
        let names: Vec<String> = map.iter().map(|(name, _)| name.clone()).collect();
        let files: std::collections::HashMap<&str, &str> = map
            .iter()
            .map(|(name, file)| (name.as_str(), file.as_str()))
            .collect();

        Ok(Self::load_names(&names, output, |name| {
            let file = files.get(name).ok_or_else(|| AudioError::SampleLoad {
                name: name.to_string(),
                reason: "no file mapped".into(),
            })?;
            source.fetch(file).map_err(|e| AudioError::SampleLoad {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })
        }))
    }

    /// Fetches and decodes one sample per name in parallel. The result is
    /// positionally aligned with `names`.
    pub fn load_names<F>(names: &[String], output: OutputHandle, resolve: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<u8>, AudioError> + Sync,
    {
        let instruments: Vec<Instrument> = names
            .par_iter()
            .map(|name| match resolve(name.as_str()).and_then(|bytes| decode_wav(name, &bytes)) {
                Ok(buffer) => {
                    log::debug!("loaded sample {name}: {:.2}s", buffer.duration_secs());
                    Instrument {
                        name: name.clone(),
                        buffer: Arc::new(buffer),
                        loaded: true,
                    }
                }
                Err(e) => {
                    log::warn!("{e}; using silence for this row");
                    Instrument {
                        name: name.clone(),
                        buffer: Arc::new(SampleBuffer::silent()),
                        loaded: false,
                    }
                }
            })
            .collect();

        let failed = instruments.iter().filter(|i| !i.loaded).count();
        log::info!("sample bank ready: {} instruments, {failed} unavailable", instruments.len());

        Self { instruments, output }
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.name.clone()).collect()
    }

    pub fn instrument(&self, index: usize) -> Option<&Instrument> {
        self.instruments.get(index)
    }

    /// Rows whose sample failed to load.
    pub fn unavailable(&self) -> usize {
        self.instruments.iter().filter(|i| !i.loaded).count()
    }

    pub fn output(&self) -> &OutputHandle {
        &self.output
    }

    /// Starts an independent voice for `index`. Returns whether anything was
    /// queued; never fails.
    pub fn play(&self, index: usize, params: TriggerParams) -> bool {
        let Some(instrument) = self.instruments.get(index) else {
            return false;
        };
        if instrument.buffer.is_empty() {
            return false;
        }
        self.output.send(AudioCommand::Trigger {
            buffer: Arc::clone(&instrument.buffer),
            gain: params.gain,
            playback_rate: params.playback_rate,
        })
    }
}

impl SamplePlayer for SampleBank {
    fn trigger(&self, row: usize, params: TriggerParams) {
        self.play(row, params);
    }

    fn set_volume(&self, volume: f32) {
        self.output.set_volume(volume);
    }

    fn resume(&self) {
        self.output.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::wav_bytes;
    use crate::audio::output::OutputState;
    use crate::audio::source::{scratch_dir, DirectorySource, SAMPLE_MAP_FILE};
    use crate::sequencer::{Grid, Sequencer};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_failed_sample_keeps_alignment() {
        let (output, _rx) = OutputHandle::detached(0.8);
        let bank = SampleBank::load_names(&names(&["Kick", "Broken", "Snare"]), output, |name| {
            if name == "Broken" {
                Err(AudioError::SampleLoad {
                    name: name.into(),
                    reason: "404".into(),
                })
            } else {
                Ok(wav_bytes(1, 44_100, &[100, 200, 300]))
            }
        });

        assert_eq!(bank.names(), names(&["Kick", "Broken", "Snare"]));
        assert_eq!(bank.unavailable(), 1);
        assert!(bank.instrument(1).unwrap().buffer.is_empty());
        assert_eq!(bank.instrument(2).unwrap().buffer.len(), 3);
    }

    #[test]
    fn test_undecodable_sample_is_silent() {
        let (output, _rx) = OutputHandle::detached(0.8);
        let bank = SampleBank::load_names(&names(&["Kick"]), output, |_| Ok(b"garbage".to_vec()));
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.unavailable(), 1);
    }

    #[test]
    fn test_trigger_queues_voice() {
        let (output, rx) = OutputHandle::detached(0.8);
        let bank = SampleBank::load_names(&names(&["Kick"]), output, |_| Ok(wav_bytes(1, 44_100, &[1, 2])));

        let params = TriggerParams {
            gain: 0.5,
            playback_rate: 1.5,
        };
        bank.trigger(0, params);
        bank.trigger(0, params);

        let cmds: Vec<AudioCommand> = rx.try_iter().collect();
        assert_eq!(cmds.len(), 2);
        match &cmds[0] {
            AudioCommand::Trigger {
                buffer,
                gain,
                playback_rate,
            } => {
                assert_eq!(buffer.len(), 2);
                assert_eq!(*gain, 0.5);
                assert_eq!(*playback_rate, 1.5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_trigger_is_noop_when_unplayable() {
        let (output, rx) = OutputHandle::detached(0.8);
        let bank = SampleBank::load_names(&names(&["Kick", "Broken"]), output.clone(), |name| {
            if name == "Kick" {
                Ok(wav_bytes(1, 44_100, &[1]))
            } else {
                Ok(Vec::new())
            }
        });

        assert!(!bank.play(1, TriggerParams::default()));
        assert!(!bank.play(7, TriggerParams::default()));
        output.suspend();
        assert_eq!(output.state(), OutputState::Suspended);
        assert!(!bank.play(0, TriggerParams::default()));
        assert!(rx.try_recv().is_err());

        bank.resume();
        assert!(bank.play(0, TriggerParams::default()));
    }

    #[test]
    fn test_unavailable_output_never_panics() {
        let bank = SampleBank::load_names(&names(&["Kick"]), OutputHandle::unavailable(), |_| {
            Ok(wav_bytes(1, 44_100, &[1]))
        });
        bank.trigger(0, TriggerParams::default());
        bank.set_volume(0.3);
        bank.resume();
        assert!(!bank.play(0, TriggerParams::default()));
    }

    #[test]
    fn test_cell_toggle_wakes_suspended_output() {
        let (output, rx) = OutputHandle::detached(0.8);
        output.suspend();
        let bank = SampleBank::load_names(&names(&["Kick"]), output.clone(), |_| {
            Ok(wav_bytes(1, 44_100, &[1, 2]))
        });
        let mut sequencer = Sequencer::new(Grid::new(1, 8), Arc::new(bank));

        assert!(sequencer.toggle_cell(0, 3));
        assert_eq!(output.state(), OutputState::Running);
        let cmds: Vec<AudioCommand> = rx.try_iter().collect();
        assert_eq!(cmds.len(), 1);
        assert!(matches!(cmds[0], AudioCommand::Trigger { .. }));
    }

    #[test]
    fn test_volume_applies_at_output() {
        let (output, _rx) = OutputHandle::detached(0.8);
        let bank = SampleBank::empty(output);
        bank.set_volume(0.5);
        assert_eq!(bank.output().master_gain(), 0.25);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = scratch_dir("bank");
        std::fs::write(
            dir.join(SAMPLE_MAP_FILE),
            r#"{"Kick": "kick.wav", "Snare": "missing.wav", "Hihat": "hat.wav"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("kick.wav"), wav_bytes(1, 44_100, &[1, 2, 3, 4])).unwrap();
        std::fs::write(dir.join("hat.wav"), wav_bytes(2, 44_100, &[1, 2])).unwrap();

        let (output, _rx) = OutputHandle::detached(0.8);
        let bank = SampleBank::load(&DirectorySource::new(&dir), output).unwrap();
        assert_eq!(bank.names(), names(&["Kick", "Snare", "Hihat"]));
        assert_eq!(bank.unavailable(), 1);
        assert_eq!(bank.instrument(0).unwrap().buffer.len(), 4);
        assert_eq!(bank.instrument(2).unwrap().buffer.len(), 1);
    }
}
