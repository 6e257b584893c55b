use crate::error::{EngineError, Result};
use std::path::Path;

/// Decoded, deinterleaved stereo audio. Mono sources are duplicated into
/// both channels at load time so the render path never branches on
/// channel count.
#[derive(Debug)]
pub struct AudioBufferPair {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBufferPair {
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Self {
        debug_assert_eq!(left.len(), right.len());
        Self {
            left,
            right,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.left.len() as f64 / self.sample_rate as f64
    }

    /// Decode a WAV file. Integer formats are normalized to [-1, 1];
    /// sources with more than two channels are rejected.
    pub fn load_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.channels == 0 || spec.channels > 2 {
            return Err(EngineError::Decode(format!(
                "unsupported channel count {} in {}",
                spec.channels,
                path.display()
            )));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<std::result::Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let (left, right) = if spec.channels == 1 {
            (interleaved.clone(), interleaved)
        } else {
            let mut left = Vec::with_capacity(interleaved.len() / 2);
            let mut right = Vec::with_capacity(interleaved.len() / 2);
            for frame in interleaved.chunks_exact(2) {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            (left, right)
        };

        Ok(Self::new(left, right, spec.sample_rate))
    }
}
