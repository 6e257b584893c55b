use std::f32::consts::TAU;

/// Phase-accumulator sine oscillator.
///
/// The same math serves audio-rate tones and the ~1 Hz LFOs that modulate
/// the smear delay lines; the caller supplies the frequency per sample so a
/// ramping frequency stays click-free.
#[derive(Debug, Clone)]
pub struct SineOsc {
    phase: f32,
}

impl SineOsc {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }

    /// Start at a fixed phase offset (0..1 of a cycle). Used to decorrelate
    /// the smear stages.
    pub fn with_phase(phase: f32) -> Self {
        Self {
            phase: phase.rem_euclid(1.0) * TAU,
        }
    }

    /// Produce one sample at `frequency_hz` and advance the phase.
    #[inline]
    pub fn next(&mut self, frequency_hz: f32, sample_rate: f32) -> f32 {
        let out = self.phase.sin();
        self.phase += TAU * frequency_hz / sample_rate;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        out
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

impl Default for SineOsc {
    fn default() -> Self {
        Self::new()
    }
}
