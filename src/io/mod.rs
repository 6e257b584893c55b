//! Audio I/O: decoding source material and driving the output device.

/// WAV decoding into deinterleaved stereo buffers.
pub mod loader;
/// cpal output stream wrapping the render backend.
pub mod output;

pub use loader::AudioBufferPair;
pub use output::OutputStream;
