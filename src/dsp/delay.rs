/// Pre-allocated delay line with fractional reads.
///
/// The buffer is sized once at construction; `write` and the read methods
/// never allocate, so the line can live inside the render path. Reads are
/// expressed as an age in samples relative to the most recently written
/// sample: `read_delayed(1)` returns the previous call's input.
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    /// Create a line holding up to `max_delay_samples` of history.
    pub fn new(max_delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay_samples.max(2)],
            write_pos: 0,
        }
    }

    /// Create a line holding `max_delay_seconds` of history at `sample_rate`.
    pub fn with_duration(max_delay_seconds: f32, sample_rate: f32) -> Self {
        Self::new((max_delay_seconds * sample_rate).ceil() as usize + 1)
    }

    pub fn max_delay_samples(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Push one sample of input history.
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    /// Read the sample written `delay_samples` calls ago (clamped to the
    /// line's capacity).
    #[inline]
    pub fn read_delayed(&self, delay_samples: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay_samples.clamp(1, len - 1);
        let read_pos = (self.write_pos + len - delay) % len;
        self.buffer[read_pos]
    }

    /// Fractional read with linear interpolation, for modulated taps where
    /// the delay time moves continuously.
    #[inline]
    pub fn read_interpolated(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay_samples.clamp(1.0, (len - 1) as f32);
        let whole = delay as usize;
        let frac = delay - whole as f32;

        let newer = (self.write_pos + len - whole) % len;
        let older = (newer + len - 1) % len;

        self.buffer[newer] * (1.0 - frac) + self.buffer[older] * frac
    }

    /// Fixed-delay in-place processing of a block.
    pub fn render(&mut self, buffer: &mut [f32], delay_samples: usize) {
        for sample in buffer.iter_mut() {
            self.write(*sample);
            *sample = self.read_delayed(delay_samples);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
