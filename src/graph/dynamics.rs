use crate::dsp::crossfade::{Crossfade, CrossfadeLaw};

/*
Output dynamics
===============

A gentle RMS compressor on the master bus, sitting behind a linear
compressor/bypass crossfade so toggling it is a 20 ms blend rather than a
switch. Both legs carry the same signal, which is exactly the case where a
linear law beats equal-power: the correlated sum stays at unity through the
whole fade.

Detection is RMS over a 10 ms window (peak detection overreacts to the
engine's beating tones), and the gain computer runs a one-pole smoother
with separate attack and release times.
*/

const RMS_WINDOW_SECONDS: f32 = 0.01;
const THRESHOLD: f32 = 0.5;
const RATIO: f32 = 4.0;
const ATTACK_SECONDS: f32 = 0.01;
const RELEASE_SECONDS: f32 = 0.1;

/// Running RMS over a fixed window, one per channel.
struct RmsDetector {
    window: Vec<f32>,
    pos: usize,
    sum_squares: f32,
}

impl RmsDetector {
    fn new(sample_rate: f32) -> Self {
        let len = ((RMS_WINDOW_SECONDS * sample_rate) as usize).max(1);
        Self {
            window: vec![0.0; len],
            pos: 0,
            sum_squares: 0.0,
        }
    }

    #[inline]
    fn feed(&mut self, sample: f32) -> f32 {
        let squared = sample * sample;
        self.sum_squares += squared - self.window[self.pos];
        self.window[self.pos] = squared;
        self.pos = (self.pos + 1) % self.window.len();
        // The running sum drifts with float error; clamp at zero.
        (self.sum_squares.max(0.0) / self.window.len() as f32).sqrt()
    }

    fn reset(&mut self) {
        self.window.fill(0.0);
        self.pos = 0;
        self.sum_squares = 0.0;
    }
}

struct ChannelCompressor {
    detector: RmsDetector,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl ChannelCompressor {
    fn new(sample_rate: f32) -> Self {
        Self {
            detector: RmsDetector::new(sample_rate),
            gain: 1.0,
            attack_coeff: (-1.0 / (ATTACK_SECONDS * sample_rate)).exp(),
            release_coeff: (-1.0 / (RELEASE_SECONDS * sample_rate)).exp(),
        }
    }

    #[inline]
    fn process(&mut self, sample: f32) -> f32 {
        let rms = self.detector.feed(sample);
        let target_gain = if rms > THRESHOLD {
            let compressed = THRESHOLD + (rms - THRESHOLD) / RATIO;
            compressed / rms
        } else {
            1.0
        };

        let coeff = if target_gain < self.gain {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.gain = target_gain + coeff * (self.gain - target_gain);
        sample * self.gain
    }

    fn reset(&mut self) {
        self.detector.reset();
        self.gain = 1.0;
    }
}

/// Stereo compressor stage with a blended bypass.
pub struct DynamicsStage {
    left: ChannelCompressor,
    right: ChannelCompressor,
    /// Leg A is the untouched signal, leg B the compressed one.
    blend: Crossfade,
}

impl DynamicsStage {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            left: ChannelCompressor::new(sample_rate),
            right: ChannelCompressor::new(sample_rate),
            blend: Crossfade::new(CrossfadeLaw::Linear, 0.0, 0.02, sample_rate),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.blend.set_mix(if active { 1.0 } else { 0.0 });
    }

    pub fn is_active(&self) -> bool {
        self.blend.mix_target() > 0.5
    }

    /// The compressor runs even while bypassed so its detector state is
    /// warm when the blend opens.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let (dry_gain, wet_gain) = self.blend.next_gains();
            let cl = self.left.process(*l);
            let cr = self.right.process(*r);
            *l = *l * dry_gain + cl * wet_gain;
            *r = *r * dry_gain + cr * wet_gain;
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}
