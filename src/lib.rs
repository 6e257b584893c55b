pub mod dsp;
pub mod engine;
pub mod error;
pub mod graph; // Per-ear effect units and the tone generator
pub mod io;
pub mod spatial; // HRTF positioning, speaker propagation, room acoustics

pub use engine::{Ear, EngineBackend, EngineConfig, SignalGraph, SourceInfo, TransportState};
pub use error::{EngineError, Result};

pub const MAX_BLOCK_SIZE: usize = 2048;

/// Speed of sound in air, m/s at 20 °C. Shared by every propagation model.
pub const SPEED_OF_SOUND: f32 = 343.0;
