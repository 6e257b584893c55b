//! Low-level DSP primitives used by the effect units and the engine graph.
//!
//! These components are allocation-free after construction and realtime-safe,
//! making them safe to embed directly inside render-path structs. They stay
//! focused on the signal math; the `graph`, `spatial` and `engine` modules
//! layer orchestration and parameter scheduling on top.

/// Uniform partitioned FFT convolution.
pub mod convolver;
/// Complementary gain pairs (dry/wet, direct/spatial, compressor/bypass).
pub mod crossfade;
/// Time-domain delay line with fractional interpolated reads.
pub mod delay;
/// One-pole lowpass and biquad all-pass filters.
pub mod filter;
/// Phase-accumulator sine oscillator (audio and control rate).
pub mod oscillator;
/// Scheduled linear parameter ramps.
pub mod smooth;

pub use crossfade::{Crossfade, CrossfadeLaw};
pub use smooth::Smoothed;
