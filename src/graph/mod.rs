//! Effect units wired into the engine's per-ear chains and final downmix.
//!
//! Each unit owns its state and exposes typed `process_block` methods plus
//! ramped parameter setters; the engine's render path decides the wiring.

/// Compressor/bypass stage behind a complementary crossfade.
pub mod dynamics;
/// Modulated multi-tap delay + all-pass "phase smear" coloration.
pub mod phase_smear;
/// Granular, continuously variable per-ear pitch shifter.
pub mod pitch_shift;
/// Registry of independent two-oscillator entrainment tones.
pub mod tones;

pub use phase_smear::PhaseSmearUnit;
pub use pitch_shift::PitchShiftUnit;
pub use tones::{ToneBank, ToneId, ToneParams, ToneRegistry, ToneVoice};
