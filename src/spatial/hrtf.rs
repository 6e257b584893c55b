use crate::dsp::delay::DelayLine;
use crate::dsp::filter::OnePoleLowpass;
use crate::dsp::smooth::Smoothed;
use crate::SPEED_OF_SOUND;
use std::f32::consts::FRAC_PI_2;

/*
Head-model binaural panner
==========================

A parametric HRTF approximation built from the three strongest localization
cues rather than measured impulse responses:

  ITD — the inter-aural time difference, from the Woodworth spherical-head
        formula: the far ear hears the sound later by up to
        head_radius / c · (sin|az| + |az|) ≈ 0.7 ms at 90°.

  ILD — the inter-aural level difference from head shadowing. The far ear
        is attenuated, more so at the sides, and a gentle lowpass on the
        shadowed ear mimics the shadow being frequency-dependent.

  Distance — inverse rolloff with a 1 m reference: gain = 1/max(d, 1).

Elevation thins both cues toward the poles (a source straight above has no
lateral asymmetry to exploit).

All cue values are ramped so a moving source glides instead of zipping.
*/

/// Spherical head radius used by the Woodworth ITD formula, in meters.
const HEAD_RADIUS: f32 = 0.0875;
/// Depth of the head-shadow level difference at 90° azimuth.
const SHADOW_FACTOR: f32 = 0.4;
/// Distance inside which the source no longer gets louder.
const MIN_DISTANCE: f32 = 1.0;
/// Shadowed-ear lowpass range.
const SHADOW_CUTOFF_OPEN_HZ: f32 = 20_000.0;
const SHADOW_CUTOFF_CLOSED_HZ: f32 = 1_500.0;

/// Binaural panner: mono in, (left, right) out.
pub struct HrtfPanner {
    sample_rate: f32,
    left_delay: DelayLine,
    right_delay: DelayLine,
    left_delay_samples: Smoothed,
    right_delay_samples: Smoothed,
    left_gain: Smoothed,
    right_gain: Smoothed,
    left_shadow: OnePoleLowpass,
    right_shadow: OnePoleLowpass,
    left_cutoff: Smoothed,
    right_cutoff: Smoothed,
}

impl HrtfPanner {
    pub fn new(sample_rate: f32) -> Self {
        // Enough line for the maximum ITD plus interpolation headroom.
        let max_itd_seconds = HEAD_RADIUS / SPEED_OF_SOUND * (1.0 + FRAC_PI_2) * 1.5;
        let line = || DelayLine::with_duration(max_itd_seconds.max(0.002), sample_rate);
        Self {
            sample_rate,
            left_delay: line(),
            right_delay: line(),
            left_delay_samples: Smoothed::new(1.0, 0.02, sample_rate),
            right_delay_samples: Smoothed::new(1.0, 0.02, sample_rate),
            left_gain: Smoothed::new(1.0, 0.02, sample_rate),
            right_gain: Smoothed::new(1.0, 0.02, sample_rate),
            left_shadow: OnePoleLowpass::new(SHADOW_CUTOFF_OPEN_HZ, sample_rate),
            right_shadow: OnePoleLowpass::new(SHADOW_CUTOFF_OPEN_HZ, sample_rate),
            left_cutoff: Smoothed::new(SHADOW_CUTOFF_OPEN_HZ, 0.02, sample_rate),
            right_cutoff: Smoothed::new(SHADOW_CUTOFF_OPEN_HZ, 0.02, sample_rate),
        }
    }

    /// Retarget the panner. Azimuth and elevation in radians (azimuth
    /// positive to the right), distance in meters.
    pub fn set_direction(&mut self, azimuth: f32, elevation: f32, distance: f32) {
        let azimuth = azimuth.clamp(-std::f32::consts::PI, std::f32::consts::PI);
        // Cues collapse toward the poles.
        let elevation_factor = elevation.cos().abs();

        // Woodworth ITD for the far ear.
        let lateral = azimuth.sin().abs().min(1.0);
        let itd_seconds =
            HEAD_RADIUS / SPEED_OF_SOUND * (lateral + azimuth.abs().min(FRAC_PI_2)) * elevation_factor;
        let itd_samples = itd_seconds * self.sample_rate;

        // Head-shadow ILD, also scaled by elevation.
        let shadow = SHADOW_FACTOR * lateral * elevation_factor;
        let distance_gain = MIN_DISTANCE / distance.max(MIN_DISTANCE);

        let (near_gain, far_gain) = (1.0, 1.0 - shadow);
        let far_cutoff = SHADOW_CUTOFF_OPEN_HZ
            - (SHADOW_CUTOFF_OPEN_HZ - SHADOW_CUTOFF_CLOSED_HZ) * lateral * elevation_factor;

        if azimuth >= 0.0 {
            // Source to the right: left ear is far.
            self.left_delay_samples.set_target(1.0 + itd_samples);
            self.right_delay_samples.set_target(1.0);
            self.left_gain.set_target(far_gain * distance_gain);
            self.right_gain.set_target(near_gain * distance_gain);
            self.left_cutoff.set_target(far_cutoff);
            self.right_cutoff.set_target(SHADOW_CUTOFF_OPEN_HZ);
        } else {
            self.left_delay_samples.set_target(1.0);
            self.right_delay_samples.set_target(1.0 + itd_samples);
            self.left_gain.set_target(near_gain * distance_gain);
            self.right_gain.set_target(far_gain * distance_gain);
            self.left_cutoff.set_target(SHADOW_CUTOFF_OPEN_HZ);
            self.right_cutoff.set_target(far_cutoff);
        }
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> (f32, f32) {
        self.left_delay.write(input);
        self.right_delay.write(input);

        // Recompute the filter coefficient only while the cutoff moves.
        if self.left_cutoff.is_ramping() {
            self.left_shadow.set_cutoff(self.left_cutoff.next(), self.sample_rate);
        }
        if self.right_cutoff.is_ramping() {
            self.right_shadow.set_cutoff(self.right_cutoff.next(), self.sample_rate);
        }

        let l = self.left_delay.read_interpolated(self.left_delay_samples.next());
        let r = self
            .right_delay
            .read_interpolated(self.right_delay_samples.next());

        let l = self.left_shadow.process(l) * self.left_gain.next();
        let r = self.right_shadow.process(r) * self.right_gain.next();
        (l, r)
    }

    /// Pan a mono block, adding into the stereo outputs.
    pub fn process_add(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        for ((l, r), &x) in left.iter_mut().zip(right.iter_mut()).zip(input.iter()) {
            let (pl, pr) = self.process_sample(x);
            *l += pl;
            *r += pr;
        }
    }

    pub fn reset(&mut self) {
        self.left_delay.reset();
        self.right_delay.reset();
        self.left_shadow.reset();
        self.right_shadow.reset();
    }
}
