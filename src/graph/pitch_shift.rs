use crate::dsp::delay::DelayLine;
use crate::dsp::filter::hann;
use crate::dsp::smooth::Smoothed;
use crate::error::{EngineError, Result};

/*
Granular pitch shift
====================

A continuously variable pitch shifter built on a delay line with two
sweeping read taps. Each tap's delay time glides across a short window at a
rate proportional to `1 - ratio`: reading progressively "later" slows the
signal down (pitch drops), reading progressively "earlier" speeds it up
(pitch rises). When a tap reaches the edge of the window it wraps, and a
raised-cosine window on each tap hides the wrap — the second tap runs half
a window out of phase so one is always near full gain while the other
crosses its seam.

This is the grain-playback scheme of asynchronous granular synthesis
reduced to two deterministic grains, which is what makes it cheap enough to
run one fully independent instance per ear. Per-ear asymmetric detuning of
a mono-derived source is what turns into audible beating, so the two
instances must never share state.

Shift amounts are expressed in cents and ramped; the ratio is
2^(cents/1200).
*/

/// Sweep window length in seconds. Longer windows lower the wrap rate but
/// smear transients more; 50 ms is the usual compromise.
const WINDOW_SECONDS: f32 = 0.05;
/// Detune range guard: ±2 octaves.
const MAX_CENTS: f32 = 2_400.0;

/// Continuously variable pitch shifter, one independent instance per ear.
pub struct PitchShiftUnit {
    sample_rate: f32,
    window_samples: f32,
    line: DelayLine,
    // Tap phases in 0..1 across the window, half a window apart.
    phase_a: f32,
    phase_b: f32,
    ratio: Smoothed,
}

impl PitchShiftUnit {
    /// Register a shifter on the real-time path. Fails when the processing
    /// context's sample rate cannot support the grain window.
    pub fn register(sample_rate: f32) -> Result<Self> {
        if !(8_000.0..=192_000.0).contains(&sample_rate) {
            return Err(EngineError::Initialization(format!(
                "pitch shift unit rejected sample rate {sample_rate}"
            )));
        }

        let window_samples = WINDOW_SECONDS * sample_rate;
        Ok(Self {
            sample_rate,
            window_samples,
            line: DelayLine::with_duration(WINDOW_SECONDS * 1.5, sample_rate),
            phase_a: 0.0,
            phase_b: 0.5,
            ratio: Smoothed::new(1.0, 0.02, sample_rate),
        })
    }

    /// Ramp the shift amount. Positive cents raise pitch.
    pub fn set_cents(&mut self, cents: f32) {
        let cents = cents.clamp(-MAX_CENTS, MAX_CENTS);
        self.ratio.set_target((cents / 1_200.0).exp2());
    }

    pub fn ratio_target(&self) -> f32 {
        self.ratio.target()
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        self.line.write(input);

        let ratio = self.ratio.next();
        // Tap phase velocity: stationary at ratio 1, sweeping otherwise.
        let phase_inc = (1.0 - ratio) / self.window_samples;
        self.phase_a = (self.phase_a + phase_inc).rem_euclid(1.0);
        self.phase_b = (self.phase_b + phase_inc).rem_euclid(1.0);

        let tap_a = self.line.read_interpolated(self.phase_a * self.window_samples + 1.0);
        let tap_b = self.line.read_interpolated(self.phase_b * self.window_samples + 1.0);

        tap_a * hann(self.phase_a) + tap_b * hann(self.phase_b)
    }

    pub fn process_block(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.line.reset();
        self.phase_a = 0.0;
        self.phase_b = 0.5;
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}
