use crate::dsp::convolver::{Convolver, DEFAULT_PARTITION};
use crate::dsp::delay::DelayLine;
use crate::dsp::filter::OnePoleLowpass;
use crate::dsp::smooth::Smoothed;
use crate::spatial::ListenerPose;
use crate::{MAX_BLOCK_SIZE, SPEED_OF_SOUND};

/*
Room acoustics
==============

Two layers on top of the dry signal, both scaled by a single "amount":

  Early reflections — six discrete taps off a shared input delay line,
  placed by the mirror-image method for a corridor cross-section: floor
  and ceiling bounces (fixed, the listener's height doesn't change) plus
  first / second / third order lateral wall bounces whose path lengths
  follow the listener's offset from the walls. Lateral taps get asymmetric
  ear gains so a listener hugging the left wall hears that wall harder in
  the left ear.

  Late tail — the reflection bus (not the dry input), pre-delayed,
  lowpassed, then convolved with a synthetic exponentially decaying noise
  impulse response. The convolver kernel is
  immutable; a decay change means the control path builds a replacement
  and the render path swaps it behind a short mute (40 ms down, swap at
  the bottom, 40 ms up) so the splice is inaudible.

The geometry is a two-zone corridor: the main hall runs along Z with walls
at x = ±4 m, and a narrower side passage runs along X with walls at
z = ±3 m. The listener is in the side passage once they cross the main
hall's wall plane.
*/

/// Main hall wall planes at x = ±MAIN_HALF_WIDTH.
const MAIN_HALF_WIDTH: f32 = 4.0;
/// Side passage wall planes at z = ±SIDE_HALF_WIDTH.
const SIDE_HALF_WIDTH: f32 = 3.0;
/// Ear height above the floor / below the ceiling, in meters.
const FLOOR_DISTANCE: f32 = 1.5;
const CEILING_DISTANCE: f32 = 2.5;
/// Longest representable reflection path, bounded by the tap line.
const MAX_TAP_SECONDS: f32 = 0.49;
/// Pre-delay before the late tail, in seconds. Also hides the
/// convolver's partition latency.
const LATE_PREDELAY_SECONDS: f32 = 0.03;
/// The late tail sits this far below the early reflections at full amount.
const LATE_GAIN_SCALE: f32 = 0.6;
/// Each half of the kernel-swap mute ramp.
const SWAP_MUTE_SECONDS: f32 = 0.04;
/// ln(1000): a -60 dB decay over the nominal decay time.
const DECAY_LN_1000: f32 = 6.907_755;

/// Generate an exponentially decaying noise burst for the late tail.
/// Runs on the control path only.
pub fn synthesize_impulse(decay_seconds: f32, sample_rate: f32) -> Vec<f32> {
    let decay = decay_seconds.clamp(0.1, 10.0);
    let frames = (decay * sample_rate) as usize;
    let mut rng = fastrand::Rng::with_seed(0x6d69_7261);
    (0..frames)
        .map(|n| {
            let t = n as f32 / sample_rate;
            let envelope = (-DECAY_LN_1000 * t / decay).exp();
            (rng.f32() * 2.0 - 1.0) * envelope * 0.25
        })
        .collect()
}

struct ReflectionTap {
    delay_samples: Smoothed,
    left_gain: f32,
    right_gain: f32,
}

impl ReflectionTap {
    fn new(delay_seconds: f32, left_gain: f32, right_gain: f32, sample_rate: f32) -> Self {
        Self {
            delay_samples: Smoothed::new(delay_seconds * sample_rate, 0.02, sample_rate),
            left_gain,
            right_gain,
        }
    }
}

/// Early reflections plus convolution late tail around a dry stereo bus.
pub struct RoomAcousticsUnit {
    sample_rate: f32,
    /// Shared mono history all six taps read from.
    tap_line: DelayLine,
    taps: [ReflectionTap; 6],
    amount: Smoothed,
    predelay: DelayLine,
    predelay_samples: f32,
    absorption: OnePoleLowpass,
    absorption_cutoff: Smoothed,
    convolver: Box<Convolver>,
    pending: Option<Box<Convolver>>,
    /// Swap mute: 1 open, 0 fully muted.
    mute: Smoothed,
    retired: Vec<Box<Convolver>>,
    late_in: Vec<f32>,
    late_out: Vec<f32>,
}

impl RoomAcousticsUnit {
    /// Built on the control path with a default 2.5 s tail.
    pub fn new(sample_rate: f32) -> Self {
        let fixed = |height: f32| 2.0 * height / SPEED_OF_SOUND;
        let mut mute = Smoothed::new(1.0, SWAP_MUTE_SECONDS, sample_rate);
        mute.set_ramp_time(SWAP_MUTE_SECONDS, sample_rate);

        let mut unit = Self {
            sample_rate,
            tap_line: DelayLine::with_duration(MAX_TAP_SECONDS, sample_rate),
            taps: [
                // Floor and ceiling: fixed height, symmetric ears.
                ReflectionTap::new(fixed(FLOOR_DISTANCE), 0.5, 0.5, sample_rate),
                ReflectionTap::new(fixed(CEILING_DISTANCE), 0.45, 0.45, sample_rate),
                // Lateral first-order bounces, retargeted per listener move.
                ReflectionTap::new(0.02, 0.7, 0.4, sample_rate),
                ReflectionTap::new(0.02, 0.4, 0.7, sample_rate),
                // Higher-order wall-to-wall bounces, quieter and symmetric.
                ReflectionTap::new(0.06, 0.3, 0.3, sample_rate),
                ReflectionTap::new(0.1, 0.2, 0.2, sample_rate),
            ],
            amount: Smoothed::new(0.0, 0.02, sample_rate),
            predelay: DelayLine::with_duration(LATE_PREDELAY_SECONDS * 1.5, sample_rate),
            predelay_samples: LATE_PREDELAY_SECONDS * sample_rate,
            absorption: OnePoleLowpass::new(4_000.0, sample_rate),
            absorption_cutoff: Smoothed::new(4_000.0, 0.02, sample_rate),
            convolver: Box::new(Convolver::new(
                &synthesize_impulse(2.5, sample_rate),
                DEFAULT_PARTITION,
            )),
            pending: None,
            mute,
            retired: Vec::new(),
            late_in: vec![0.0; MAX_BLOCK_SIZE],
            late_out: vec![0.0; MAX_BLOCK_SIZE],
        };
        unit.update_listener(ListenerPose::default());
        unit
    }

    /// Overall room level; 0 bypasses both layers (dry always passes).
    pub fn set_amount(&mut self, amount: f32) {
        self.amount.set_target(amount.clamp(0.0, 1.0));
    }

    pub fn amount_target(&self) -> f32 {
        self.amount.target()
    }

    /// Retune the absorption filter; lower cutoffs read as softer surfaces.
    pub fn set_absorption(&mut self, cutoff_hz: f32) {
        self.absorption_cutoff
            .set_target(cutoff_hz.clamp(200.0, 16_000.0));
    }

    /// Install a replacement late-tail kernel. The late path ducks for
    /// ~80 ms around the swap; early reflections are unaffected.
    pub fn install_impulse(&mut self, convolver: Box<Convolver>) {
        if let Some(old_pending) = self.pending.replace(convolver) {
            // A newer kernel arrived before the previous swap landed.
            self.retired.push(old_pending);
        }
        self.mute.set_target(0.0);
    }

    /// Kernels the render path is done with, to be dropped off-thread.
    pub fn take_retired(&mut self) -> Vec<Box<Convolver>> {
        std::mem::take(&mut self.retired)
    }

    /// Current late-path gain, after amount and the swap mute.
    pub fn late_gain(&self) -> f32 {
        self.amount.value() * LATE_GAIN_SCALE * self.mute.value()
    }

    /// Retarget the lateral taps from the listener's offset inside
    /// whichever corridor zone they occupy.
    pub fn update_listener(&mut self, pose: ListenerPose) {
        // Past the main hall's wall plane means the side passage, whose
        // lateral axis is Z.
        let (offset, half_width) = if pose.position.x.abs() > MAIN_HALF_WIDTH {
            (pose.position.z, SIDE_HALF_WIDTH)
        } else {
            (pose.position.x, MAIN_HALF_WIDTH)
        };
        let offset = offset.clamp(-half_width + 0.1, half_width - 0.1);
        let width = half_width * 2.0;

        let near_left = half_width + offset;
        let near_right = half_width - offset;
        let nearest = near_left.min(near_right);

        let to_samples = |path_meters: f32| {
            (path_meters / SPEED_OF_SOUND * self.sample_rate)
                .clamp(1.0, self.tap_line.max_delay_samples() as f32)
        };
        self.taps[2].delay_samples.set_target(to_samples(2.0 * near_left));
        self.taps[3].delay_samples.set_target(to_samples(2.0 * near_right));
        self.taps[4]
            .delay_samples
            .set_target(to_samples(2.0 * (nearest + width)));
        self.taps[5]
            .delay_samples
            .set_target(to_samples(2.0 * (nearest + 2.0 * width)));
    }

    /// Add reflections and late tail to a stereo bus in place. The dry
    /// signal passes at unity regardless of amount.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        let frames = left.len().min(MAX_BLOCK_SIZE);

        for n in 0..frames {
            let mono = (left[n] + right[n]) * 0.5;
            self.tap_line.write(mono);

            // Early reflections, scaled by the shared amount.
            let amount = self.amount.next();
            let mute = self.mute.next();
            let mut er_l = 0.0;
            let mut er_r = 0.0;
            for tap in &mut self.taps {
                let sample = self.tap_line.read_interpolated(tap.delay_samples.next());
                er_l += sample * tap.left_gain;
                er_r += sample * tap.right_gain;
            }
            left[n] += er_l * amount;
            right[n] += er_r * amount;

            // Late-path feed: the reflection bus, pre-delayed, absorbed.
            self.predelay.write((er_l + er_r) * 0.5);
            if self.absorption_cutoff.is_ramping() {
                self.absorption
                    .set_cutoff(self.absorption_cutoff.next(), self.sample_rate);
            }
            self.late_in[n] = self
                .absorption
                .process(self.predelay.read_interpolated(self.predelay_samples));

            // Stash the combined late gain for after the convolution.
            self.late_out[n] = amount * LATE_GAIN_SCALE * mute;
        }

        self.maybe_swap_kernel();

        // Convolve the whole block at once, then fan out with the
        // per-sample gains computed above.
        let (late_in, gains) = (&self.late_in[..frames], &self.late_out[..frames]);
        let mut tail = [0.0f32; MAX_BLOCK_SIZE];
        self.convolver.process(late_in, &mut tail[..frames]);
        for n in 0..frames {
            let wet = tail[n] * gains[n];
            left[n] += wet;
            right[n] += wet;
        }
    }

    fn maybe_swap_kernel(&mut self) {
        if self.pending.is_some() && !self.mute.is_ramping() && self.mute.value() <= 1e-6 {
            if let Some(fresh) = self.pending.take() {
                let old = std::mem::replace(&mut self.convolver, fresh);
                self.retired.push(old);
            }
            self.mute.set_target(1.0);
        }
    }

    pub fn reset(&mut self) {
        self.tap_line.reset();
        self.predelay.reset();
        self.absorption.reset();
        self.convolver.reset();
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Vec3;

    fn run_blocks(unit: &mut RoomAcousticsUnit, blocks: usize, frames: usize) {
        let mut l = vec![0.1; frames];
        let mut r = vec![0.1; frames];
        for _ in 0..blocks {
            l.fill(0.1);
            r.fill(0.1);
            unit.process_block(&mut l, &mut r);
        }
    }

    #[test]
    fn test_impulse_envelope_decays() {
        let ir = synthesize_impulse(1.0, 48_000.0);
        assert_eq!(ir.len(), 48_000);

        let head: f32 = ir[..4_800].iter().map(|s| s.abs()).sum();
        let tail: f32 = ir[43_200..].iter().map(|s| s.abs()).sum();
        assert!(
            tail < head * 0.01,
            "tail should be ~60 dB down: head {head}, tail {tail}"
        );
    }

    #[test]
    fn test_zero_amount_passes_dry_untouched() {
        let mut unit = RoomAcousticsUnit::new(48_000.0);
        let mut l: Vec<f32> = (0..2_048).map(|i| (i as f32 * 0.07).sin()).collect();
        let mut r = l.clone();
        let original = l.clone();
        unit.process_block(&mut l, &mut r);
        for (a, b) in l.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-6, "dry signal altered at zero amount");
        }
    }

    #[test]
    fn test_amount_adds_reflection_energy() {
        let mut dry_energy = 0.0;
        let mut wet_energy = 0.0;

        for (amount, energy) in [(0.0, &mut dry_energy), (1.0, &mut wet_energy)] {
            let mut unit = RoomAcousticsUnit::new(48_000.0);
            unit.set_amount(amount);
            // Settle the amount ramp.
            run_blocks(&mut unit, 10, 1_024);

            let mut l: Vec<f32> = (0..8_192).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
            let mut r = l.clone();
            unit.process_block(&mut l, &mut r);
            *energy = l.iter().map(|s| s * s).sum::<f32>();
        }
        assert!(
            wet_energy > dry_energy * 1.02,
            "room added no energy: {dry_energy} vs {wet_energy}"
        );
    }

    #[test]
    fn test_wall_proximity_skews_reflection_ears() {
        let sr = 48_000.0;
        let mut unit = RoomAcousticsUnit::new(sr);
        unit.set_amount(1.0);
        // Hug the left wall of the main hall.
        unit.update_listener(ListenerPose {
            position: Vec3::new(-3.8, 0.0, 0.0),
            ..ListenerPose::default()
        });
        run_blocks(&mut unit, 20, 1_024);

        // The left-wall tap is closer, so its bounce lands earlier and the
        // left ear carries the stronger asymmetric gain. Check tap timing
        // directly through the retarget math instead of full audio.
        let near_left = MAIN_HALF_WIDTH - 3.8;
        let near_right = MAIN_HALF_WIDTH + 3.8;
        let left_tap = unit.taps[2].delay_samples.target();
        let right_tap = unit.taps[3].delay_samples.target();
        assert!(
            left_tap < right_tap,
            "left wall should be the earlier bounce: {left_tap} vs {right_tap}"
        );
        let expected_left = 2.0 * near_left / SPEED_OF_SOUND * sr;
        assert!((left_tap - expected_left).abs() < 1.0);
        let expected_right = 2.0 * near_right / SPEED_OF_SOUND * sr;
        assert!((right_tap - expected_right).abs() < 1.0);
    }

    #[test]
    fn test_side_passage_uses_z_axis_walls() {
        let mut unit = RoomAcousticsUnit::new(48_000.0);
        // Deep in the side passage, centered between its z walls.
        unit.update_listener(ListenerPose {
            position: Vec3::new(10.0, 0.0, 0.0),
            ..ListenerPose::default()
        });
        let centered_left = unit.taps[2].delay_samples.target();
        let centered_right = unit.taps[3].delay_samples.target();
        assert!((centered_left - centered_right).abs() < 1.0);

        // Offset along Z inside the passage skews the taps.
        unit.update_listener(ListenerPose {
            position: Vec3::new(10.0, 0.0, -2.0),
            ..ListenerPose::default()
        });
        assert!(unit.taps[2].delay_samples.target() < unit.taps[3].delay_samples.target());
    }

    #[test]
    fn test_late_tail_excited_by_reflection_bus() {
        let sr = 48_000.0;
        let mut unit = RoomAcousticsUnit::new(sr);
        unit.set_amount(1.0);
        // Settle the amount and tap ramps on silence.
        let mut l = vec![0.0; 2_048];
        let mut r = vec![0.0; 2_048];
        unit.process_block(&mut l, &mut r);

        let mut left = vec![0.0; 4_096];
        let mut right = vec![0.0; 4_096];
        left[0] = 1.0;
        right[0] = 1.0;
        unit.process_block(&mut left, &mut right);

        // A tail fed straight from the dry input would sound at pre-delay
        // plus convolver latency (~1.7 k samples). Fed from the reflection
        // bus it cannot start before the floor bounce (~420 samples) lands
        // on the bus, so the stretch in between stays silent; no early
        // reflection falls there either (lateral taps at ~1.1 k, the
        // second-order bounce past 3.3 k).
        assert!(
            left[1_500..1_850].iter().all(|s| s.abs() < 1e-6),
            "late tail arrived before the reflection bus could feed it"
        );
        assert!(
            left[2_150..3_300].iter().any(|s| s.abs() > 1e-4),
            "no late tail after the reflection path delay"
        );
    }

    #[test]
    fn test_kernel_swap_ducks_then_recovers() {
        let sr = 48_000.0;
        let mut unit = RoomAcousticsUnit::new(sr);
        unit.set_amount(1.0);
        run_blocks(&mut unit, 10, 1_024);
        let open = unit.late_gain();
        assert!((open - LATE_GAIN_SCALE).abs() < 1e-3);

        let replacement = Box::new(Convolver::new(
            &synthesize_impulse(0.5, sr),
            DEFAULT_PARTITION,
        ));
        unit.install_impulse(replacement);

        // Mid-swap (~40 ms in) the late path is muted and the old kernel
        // has been retired.
        run_blocks(&mut unit, 2, 1_024); // ~43 ms
        assert!(unit.late_gain() < 0.05, "late path not ducked during swap");
        assert_eq!(unit.take_retired().len(), 1);

        // After the up-ramp the gain is back.
        run_blocks(&mut unit, 4, 1_024);
        assert!(
            (unit.late_gain() - LATE_GAIN_SCALE).abs() < 1e-3,
            "late gain did not recover: {}",
            unit.late_gain()
        );
    }

    #[test]
    fn test_ends_exactly_one_retired_kernel_per_swap() {
        let sr = 48_000.0;
        let mut unit = RoomAcousticsUnit::new(sr);
        let kernel = || Box::new(Convolver::new(&synthesize_impulse(0.2, sr), DEFAULT_PARTITION));

        // Two installs before any processing: the superseded pending
        // kernel retires immediately, the other at the swap point.
        unit.install_impulse(kernel());
        unit.install_impulse(kernel());
        assert_eq!(unit.take_retired().len(), 1);
        run_blocks(&mut unit, 6, 1_024);
        assert_eq!(unit.take_retired().len(), 1);
    }
}
