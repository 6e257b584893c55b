use crate::dsp::delay::DelayLine;
use crate::dsp::filter::AllpassFilter;
use crate::dsp::oscillator::SineOsc;
use crate::dsp::smooth::Smoothed;

/*
Phase smear
===========

A pure coloration effect: three short delay lines in series, each with its
own slow sine LFO wobbling the delay time, followed by one all-pass stage
for extra phase dispersion. The constantly shifting micro-delays blur the
phase relationships in the signal without adding obvious echo or vibrato.

The three LFOs run at deliberately inharmonic rates (1×, 1.15×, 1.30× of
the base rate) and start at different phases, so their combined motion
never repeats audibly. Depth stays small — at full depth the taps move
±20 ms around the 30 ms center — which keeps the effect a shimmer rather
than a warble.
*/

/// Center delay of each stage, in seconds.
const BASE_DELAY_SECONDS: f32 = 0.03;
/// Base LFO rate in Hz; stages run at 1x / 1.15x / 1.30x of this.
const BASE_RATE_HZ: f32 = 1.0;
/// Per-stage rate multipliers.
const RATE_SCALES: [f32; 3] = [1.0, 1.15, 1.30];
/// `set_depth(d)` maps `d` to `d * 0.02` seconds of modulation.
const DEPTH_SCALE_SECONDS: f32 = 0.02;
/// All-pass dispersion stage tuning.
const ALLPASS_CENTER_HZ: f32 = 1_000.0;
const ALLPASS_Q: f32 = 0.8;

struct SmearStage {
    delay: DelayLine,
    lfo: SineOsc,
    rate_scale: f32,
}

/// Modulated multi-tap delay cascade, one instance per ear.
pub struct PhaseSmearUnit {
    sample_rate: f32,
    stages: [SmearStage; 3],
    allpass: AllpassFilter,
    depth_seconds: Smoothed,
    rate_hz: Smoothed,
}

impl PhaseSmearUnit {
    pub fn new(sample_rate: f32) -> Self {
        // Enough headroom for the center delay plus full modulation depth.
        let capacity = BASE_DELAY_SECONDS + DEPTH_SCALE_SECONDS * 1.5;
        let stage = |phase: f32, rate_scale: f32| SmearStage {
            delay: DelayLine::with_duration(capacity, sample_rate),
            lfo: SineOsc::with_phase(phase),
            rate_scale,
        };

        Self {
            sample_rate,
            stages: [
                stage(0.0, RATE_SCALES[0]),
                stage(0.33, RATE_SCALES[1]),
                stage(0.66, RATE_SCALES[2]),
            ],
            allpass: AllpassFilter::new(ALLPASS_CENTER_HZ, ALLPASS_Q, sample_rate),
            depth_seconds: Smoothed::new(DEPTH_SCALE_SECONDS * 0.5, 0.02, sample_rate),
            rate_hz: Smoothed::new(BASE_RATE_HZ, 0.02, sample_rate),
        }
    }

    /// Scale modulation depth. `depth` in [0, 1] maps to 0–20 ms of tap
    /// movement per stage.
    pub fn set_depth(&mut self, depth: f32) {
        self.depth_seconds
            .set_target(depth.clamp(0.0, 1.0) * DEPTH_SCALE_SECONDS);
    }

    /// Scale all three LFO rates proportionally around `rate` Hz.
    pub fn set_rate(&mut self, rate_hz: f32) {
        self.rate_hz.set_target(rate_hz.clamp(0.01, 20.0));
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let depth = self.depth_seconds.next();
        let rate = self.rate_hz.next();

        let mut sample = input;
        for stage in &mut self.stages {
            let wobble = stage.lfo.next(rate * stage.rate_scale, self.sample_rate);
            let delay_seconds = BASE_DELAY_SECONDS + wobble * depth;
            let delay_samples = (delay_seconds * self.sample_rate).max(1.0);

            stage.delay.write(sample);
            sample = stage.delay.read_interpolated(delay_samples);
        }

        self.allpass.process(sample)
    }

    pub fn process_block(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.delay.reset();
        }
        self.allpass.reset();
    }
}
