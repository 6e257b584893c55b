use crate::dsp::smooth::Smoothed;
use std::f32::consts::FRAC_PI_2;

/*
Complementary gain pairs
========================

The engine has three places where two signal legs share one fader: dry/wet,
direct/spatial, and compressor/bypass. Historically each leg had its own
independently-set gain and the complementarity was a convention; here the
pair is one object with one scalar setter, so the invariant is structural.

Equal-power law: gain_a = cos(mix·π/2), gain_b = sin(mix·π/2), which keeps
gain_a² + gain_b² == 1 for every mix value — perceived loudness stays flat
across the whole fade. The linear law (1-mix, mix) is kept for legs carrying
near-identical signals, where equal-power would bump the sum above unity.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeLaw {
    /// cos/sin gains; constant perceived loudness for uncorrelated legs.
    EqualPower,
    /// (1-v, v) gains; constant sum for correlated legs.
    Linear,
}

/// Two complementary gain stages behind a single ramped mix scalar.
/// `mix == 0.0` is all leg A, `mix == 1.0` is all leg B.
pub struct Crossfade {
    law: CrossfadeLaw,
    mix: Smoothed,
}

impl Crossfade {
    pub fn new(law: CrossfadeLaw, initial_mix: f32, ramp_seconds: f32, sample_rate: f32) -> Self {
        Self {
            law,
            mix: Smoothed::new(initial_mix.clamp(0.0, 1.0), ramp_seconds, sample_rate),
        }
    }

    /// Schedule a ramp toward a new mix value (clamped to [0, 1]).
    pub fn set_mix(&mut self, mix: f32) {
        self.mix.set_target(mix.clamp(0.0, 1.0));
    }

    pub fn mix_target(&self) -> f32 {
        self.mix.target()
    }

    /// Gains the pair would produce at a given mix value.
    #[inline]
    pub fn gains_at(law: CrossfadeLaw, mix: f32) -> (f32, f32) {
        match law {
            CrossfadeLaw::EqualPower => ((mix * FRAC_PI_2).cos(), (mix * FRAC_PI_2).sin()),
            CrossfadeLaw::Linear => (1.0 - mix, mix),
        }
    }

    /// Advance the ramp one sample and return `(gain_a, gain_b)`.
    #[inline]
    pub fn next_gains(&mut self) -> (f32, f32) {
        Self::gains_at(self.law, self.mix.next())
    }

    /// Blend one sample from each leg, advancing the ramp.
    #[inline]
    pub fn blend(&mut self, a: f32, b: f32) -> f32 {
        let (ga, gb) = self.next_gains();
        a * ga + b * gb
    }

    pub fn is_ramping(&self) -> bool {
        self.mix.is_ramping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_power_invariant_holds_everywhere() {
        for i in 0..=100 {
            let v = i as f32 / 100.0;
            let (a, b) = Crossfade::gains_at(CrossfadeLaw::EqualPower, v);
            assert!(
                (a * a + b * b - 1.0).abs() < 1e-6,
                "dry^2 + wet^2 != 1 at mix {v}: {a}, {b}"
            );
        }
    }

    #[test]
    fn test_equal_power_endpoints() {
        let (a, b) = Crossfade::gains_at(CrossfadeLaw::EqualPower, 0.0);
        assert!((a - 1.0).abs() < 1e-6 && b.abs() < 1e-6);
        let (a, b) = Crossfade::gains_at(CrossfadeLaw::EqualPower, 1.0);
        assert!(a.abs() < 1e-6 && (b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_midpoint_is_minus_three_db() {
        let (a, b) = Crossfade::gains_at(CrossfadeLaw::EqualPower, 0.5);
        assert!((a - 0.707).abs() < 1e-3);
        assert!((b - 0.707).abs() < 1e-3);
    }

    #[test]
    fn test_legs_never_both_full() {
        for i in 0..=100 {
            let v = i as f32 / 100.0;
            let (a, b) = Crossfade::gains_at(CrossfadeLaw::EqualPower, v);
            assert!(a < 1.0 + 1e-6 && b < 1.0 + 1e-6);
            assert!(
                !(a > 0.999 && b > 0.999),
                "both legs at full gain at mix {v}"
            );
        }
    }

    #[test]
    fn test_mix_input_is_clamped() {
        let mut fade = Crossfade::new(CrossfadeLaw::Linear, 0.0, 0.001, 48_000.0);
        fade.set_mix(3.0);
        assert_eq!(fade.mix_target(), 1.0);
        fade.set_mix(-1.0);
        assert_eq!(fade.mix_target(), 0.0);
    }

    #[test]
    fn test_blend_ramps_not_jumps() {
        let mut fade = Crossfade::new(CrossfadeLaw::EqualPower, 0.0, 0.02, 48_000.0);
        fade.set_mix(1.0);
        // First blended sample should still be almost entirely leg A.
        let out = fade.blend(1.0, 0.0);
        assert!(out > 0.99, "crossfade jumped instead of ramping: {out}");
        assert!(fade.is_ramping());
    }
}
