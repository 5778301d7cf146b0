use std::io::Cursor;

use crate::error::AudioError;

// one stereo frame
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

impl StereoFrame {
    pub fn mono(value: f32) -> Self {
        Self { left: value, right: value }
    }
}

/// A decoded sample held in memory, at the rate it was recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    pub frames: Vec<StereoFrame>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    /// Zero-length placeholder used when a sample fails to load, so row
    /// indices stay aligned with instrument names.
    pub fn silent() -> Self {
        Self {
            frames: Vec::new(),
            sample_rate: 44_100,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.sample_rate as f64
    }
}

/// Decodes WAV bytes (integer or float PCM, mono or multi-channel) into
/// stereo frames. Channels past the second are dropped.
pub fn decode_wav(name: &str, bytes: &[u8]) -> Result<SampleBuffer, AudioError> {
    let decode_err = |source| AudioError::BufferDecode {
        name: name.to_string(),
        source,
    };

    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode_err)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_err)?,
        hound::SampleFormat::Int => {
            let max = 2.0_f32.powi(spec.bits_per_sample as i32 - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode_err)?
        }
    };

    let frames = if channels == 1 {
        samples.into_iter().map(StereoFrame::mono).collect()
    } else {
        samples
            .chunks_exact(channels)
            .map(|c| StereoFrame {
                left: c[0],
                right: c[1],
            })
            .collect()
    };

    Ok(SampleBuffer {
        frames,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
pub(crate) fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mono_duplicates_channels() {
        let bytes = wav_bytes(1, 22_050, &[0, 16_384, -16_384]);
        let buffer = decode_wav("kick", &bytes).unwrap();
        assert_eq!(buffer.sample_rate, 22_050);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.frames[1], StereoFrame::mono(0.5));
        assert_eq!(buffer.frames[2], StereoFrame::mono(-0.5));
    }

    #[test]
    fn test_decode_stereo() {
        let bytes = wav_bytes(2, 44_100, &[16_384, 0, 0, -16_384]);
        let buffer = decode_wav("hat", &bytes).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.frames[0], StereoFrame { left: 0.5, right: 0.0 });
        assert_eq!(buffer.frames[1], StereoFrame { left: 0.0, right: -0.5 });
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_wav("snare", b"not a wav file").unwrap_err();
        assert!(matches!(err, AudioError::BufferDecode { ref name, .. } if name == "snare"));
    }

    #[test]
    fn test_silent_placeholder() {
        let silent = SampleBuffer::silent();
        assert!(silent.is_empty());
        assert_eq!(silent.duration_secs(), 0.0);
    }
}
