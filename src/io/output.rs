use crate::engine::EngineBackend;
use crate::error::{EngineError, Result};
use crate::MAX_BLOCK_SIZE;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

/// A running cpal output stream owning the render backend.
///
/// The backend renders deinterleaved stereo in `MAX_BLOCK_SIZE` chunks;
/// this wrapper owns the interleaving and the device plumbing. Dropping
/// the stream stops audio.
pub struct OutputStream {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl OutputStream {
    /// Open the default output device at the backend's sample rate and
    /// start rendering.
    pub fn start(mut backend: Box<EngineBackend>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::Initialization("no output device available".into()))?;

        let sample_rate = backend.sample_rate() as u32;
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut left = vec![0.0f32; MAX_BLOCK_SIZE];
        let mut right = vec![0.0f32; MAX_BLOCK_SIZE];

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // The device may hand us more than one block's worth.
                    for chunk in data.chunks_mut(MAX_BLOCK_SIZE * 2) {
                        let frames = chunk.len() / 2;
                        backend.render(&mut left[..frames], &mut right[..frames]);
                        for (n, frame) in chunk.chunks_exact_mut(2).enumerate() {
                            frame[0] = left[n];
                            frame[1] = right[n];
                        }
                    }
                },
                |err| error!(%err, "output stream error"),
                None,
            )
            .map_err(|e| EngineError::Initialization(format!("failed to build stream: {e}")))?;

        stream
            .play()
            .map_err(|e| EngineError::Initialization(format!("failed to start stream: {e}")))?;

        info!(sample_rate, "output stream running");
        Ok(Self {
            stream,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Suspend the device callback without tearing the stream down.
    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| EngineError::Initialization(format!("failed to pause stream: {e}")))
    }

    pub fn resume(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| EngineError::Initialization(format!("failed to resume stream: {e}")))
    }
}
