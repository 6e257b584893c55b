/*
Scheduled parameter ramps
=========================

Every externally visible parameter in the engine changes through one of
these. An abrupt write to a live gain or frequency is audible as a click,
so the control path only ever schedules a new target; the render path walks
toward it linearly over the ramp length (about 20 ms for most parameters).

In-flight ramps are never cancelled, only superseded: a new target restarts
the ramp from the current value, which is exactly the behavior the control
path expects when it spams position updates every frame.
*/

/// Default ramp length for parameter changes, in seconds.
pub const DEFAULT_RAMP_SECONDS: f32 = 0.02;

/// A parameter that moves toward its target one sample at a time.
#[derive(Debug, Clone)]
pub struct Smoothed {
    value: f32,
    target: f32,
    step: f32,
    remaining: u32,
    ramp_samples: u32,
}

impl Smoothed {
    pub fn new(initial: f32, ramp_seconds: f32, sample_rate: f32) -> Self {
        Self {
            value: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
            ramp_samples: (ramp_seconds * sample_rate).max(1.0) as u32,
        }
    }

    /// Schedule a ramp from the current value to `target`.
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < f32::EPSILON && self.remaining == 0 {
            return;
        }
        self.target = target;
        self.remaining = self.ramp_samples;
        self.step = (target - self.value) / self.remaining as f32;
    }

    /// Jump without ramping. Construction-time use only; a live signal
    /// should always go through `set_target`.
    #[inline]
    pub fn snap_to(&mut self, value: f32) {
        self.value = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Advance one sample and return the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.value += self.step;
            self.remaining -= 1;
            if self.remaining == 0 {
                // Snap exactly onto the target so float drift never
                // accumulates across many ramps.
                self.value = self.target;
            }
        }
        self.value
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    /// Takes effect on the next `set_target`.
    pub fn set_ramp_time(&mut self, ramp_seconds: f32, sample_rate: f32) {
        self.ramp_samples = (ramp_seconds * sample_rate).max(1.0) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_reaches_target_exactly() {
        let mut p = Smoothed::new(0.0, 0.001, 48_000.0); // 48-sample ramp
        p.set_target(1.0);
        for _ in 0..48 {
            p.next();
        }
        assert_eq!(p.value(), 1.0);
        assert!(!p.is_ramping());
    }

    #[test]
    fn test_ramp_is_monotonic() {
        let mut p = Smoothed::new(0.2, 0.002, 48_000.0);
        p.set_target(0.9);
        let mut prev = p.value();
        for _ in 0..200 {
            let v = p.next();
            assert!(v >= prev - 1e-7, "ramp went backwards: {prev} -> {v}");
            prev = v;
        }
    }

    #[test]
    fn test_new_target_supersedes_ramp() {
        let mut p = Smoothed::new(0.0, 0.01, 48_000.0);
        p.set_target(1.0);
        for _ in 0..100 {
            p.next();
        }
        let mid = p.value();
        assert!(mid > 0.0 && mid < 1.0);

        // Redirect mid-flight; the ramp restarts from the current value.
        p.set_target(0.0);
        for _ in 0..480 {
            p.next();
        }
        assert_eq!(p.value(), 0.0);
    }

    #[test]
    fn test_snap_bypasses_ramp() {
        let mut p = Smoothed::new(0.0, 0.02, 48_000.0);
        p.snap_to(0.5);
        assert_eq!(p.value(), 0.5);
        assert!(!p.is_ramping());
    }
}
