use std::f32::consts::TAU;

/// One-pole lowpass, the "absorption" filter of the room model.
///
/// A single pole is all the late-reverb path needs: a gentle 6 dB/octave
/// rolloff that darkens the tail the way soft surfaces do.
pub struct OnePoleLowpass {
    state: f32,
    coeff: f32,
    cutoff_hz: f32,
}

impl OnePoleLowpass {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let mut filter = Self {
            state: 0.0,
            coeff: 0.0,
            cutoff_hz,
        };
        filter.set_cutoff(cutoff_hz, sample_rate);
        filter
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f32, sample_rate: f32) {
        let cutoff = cutoff_hz.clamp(10.0, sample_rate * 0.49);
        self.cutoff_hz = cutoff;
        self.coeff = (-TAU * cutoff / sample_rate).exp();
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.state = input * (1.0 - self.coeff) + self.state * self.coeff;
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// Biquad all-pass filter (RBJ Audio EQ Cookbook coefficients).
///
/// Passes all frequencies at unit gain but rotates phase around the center
/// frequency. The smear unit uses one of these after its modulated delays
/// for extra phase dispersion.
pub struct AllpassFilter {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl AllpassFilter {
    pub fn new(center_hz: f32, q: f32, sample_rate: f32) -> Self {
        let mut filter = Self {
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        };
        filter.configure(center_hz, q, sample_rate);
        filter
    }

    pub fn configure(&mut self, center_hz: f32, q: f32, sample_rate: f32) {
        let freq = center_hz.clamp(10.0, sample_rate * 0.49);
        let q = q.max(0.01);

        let omega = TAU * freq / sample_rate;
        let alpha = omega.sin() / (2.0 * q);
        let cos_omega = omega.cos();

        let a0 = 1.0 + alpha;
        self.b0 = (1.0 - alpha) / a0;
        self.b1 = (-2.0 * cos_omega) / a0;
        self.b2 = (1.0 + alpha) / a0;
        self.a1 = (-2.0 * cos_omega) / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Raised-cosine (Hann) window evaluated at `phase` in 0..1.
#[inline]
pub fn hann(phase: f32) -> f32 {
    0.5 * (1.0 - (TAU * phase).cos())
}
