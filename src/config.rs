/// Startup configuration, read from a JSON file. Every field is optional.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::persistence::DEFAULT_PATTERN;
use crate::sequencer::{
    grid, DEFAULT_TEMPO, DEFAULT_VOLUME, MAX_SPEED, MAX_TEMPO, MIN_SPEED, MIN_TEMPO,
};

pub const CONFIG_FILE: &str = "beatgrid.json";
pub const SAMPLES_ENV: &str = "BEATGRID_SAMPLES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sample_dir: PathBuf,
    pub pattern_dir: PathBuf,
    pub pattern_name: String,
    pub tempo: f32,
    pub columns: usize,
    pub volume: f32,
    pub playback_rate: f32,
    pub looping: bool,
    /// Index into the available MIDI output ports.
    pub midi_port: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_dir: PathBuf::from("samples"),
            pattern_dir: PathBuf::from("."),
            pattern_name: DEFAULT_PATTERN.to_string(),
            tempo: DEFAULT_TEMPO,
            columns: grid::DEFAULT_COLUMNS,
            volume: DEFAULT_VOLUME,
            playback_rate: 1.0,
            looping: true,
            midi_port: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Config for this process: the file named by the first argument, else
    /// `beatgrid.json` in the working directory if present, else defaults.
    pub fn from_args() -> Result<Self, ConfigError> {
        let arg = std::env::args_os().nth(1).map(PathBuf::from);
        let samples = std::env::var_os(SAMPLES_ENV).map(PathBuf::from);
        Self::resolve(arg.as_deref(), Path::new(CONFIG_FILE), samples)
    }

    fn resolve(arg: Option<&Path>, fallback: &Path, samples: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match arg {
            Some(path) => Self::load(path)?,
            None if fallback.exists() => Self::load(fallback)?,
            None => Self::default(),
        };
        if let Some(dir) = samples {
            config.sample_dir = dir;
        }
        Ok(config.sanitized())
    }

    /// Clamps every value into the range the sequencer accepts.
    pub fn sanitized(mut self) -> Self {
        self.tempo = self.tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.columns = self.columns.clamp(grid::MIN_COLUMNS, grid::MAX_COLUMNS);
        self.volume = self.volume.clamp(0.0, 1.0);
        self.playback_rate = self.playback_rate.clamp(MIN_SPEED, MAX_SPEED);
        if self.pattern_name.trim().is_empty() {
            self.pattern_name = DEFAULT_PATTERN.to_string();
        }
        self
    }
}
