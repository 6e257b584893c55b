use rtrb::{Consumer, Producer, RingBuffer};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/*
Render-side analysis feeds
==========================

Two channels out of the render thread, neither of which may block it:

  - RMS levels published through atomics (f32 bit-cast into AtomicU32),
    overwritten every block; readers see the latest value whenever they
    poll.
  - Raw sample taps over bounded SPSC rings; the render side pushes and
    silently drops when a consumer falls behind. Analysis lag costs data,
    never audio.
*/

/// Per-ear RMS levels shared with the control/UI side.
#[derive(Default)]
pub struct Levels {
    left_bits: AtomicU32,
    right_bits: AtomicU32,
}

impl Levels {
    pub fn publish(&self, left_rms: f32, right_rms: f32) {
        self.left_bits.store(left_rms.to_bits(), Ordering::Relaxed);
        self.right_bits.store(right_rms.to_bits(), Ordering::Relaxed);
    }

    pub fn left(&self) -> f32 {
        f32::from_bits(self.left_bits.load(Ordering::Relaxed))
    }

    pub fn right(&self) -> f32 {
        f32::from_bits(self.right_bits.load(Ordering::Relaxed))
    }
}

/// Render side of a sample tap: pushes, never waits.
pub struct TapProducer {
    inner: Producer<f32>,
}

impl TapProducer {
    /// Push as much of the block as fits; the remainder is dropped.
    pub fn push_block(&mut self, samples: &[f32]) {
        for &s in samples {
            if self.inner.push(s).is_err() {
                break;
            }
        }
    }
}

/// Control side of a sample tap.
pub struct TapConsumer {
    inner: Consumer<f32>,
}

impl TapConsumer {
    /// Drain up to `out.len()` samples; returns how many were read.
    pub fn drain(&mut self, out: &mut [f32]) -> usize {
        let mut read = 0;
        while read < out.len() {
            match self.inner.pop() {
                Ok(s) => {
                    out[read] = s;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        read
    }
}

/// Build a tap pair holding roughly `capacity` samples of slack.
pub fn tap_pair(capacity: usize) -> (TapProducer, TapConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1_024));
    (
        TapProducer { inner: producer },
        TapConsumer { inner: consumer },
    )
}

/// Shared level meters plus the control ends of the stereo taps.
pub struct AnalysisFeeds {
    pub levels: Arc<Levels>,
    pub left_tap: TapConsumer,
    pub right_tap: TapConsumer,
}

/// Magnitude spectrum of a windowed sample block, for visualization of
/// the beating and smear motion. Control-side only; allocates freely.
pub fn magnitude_spectrum(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let len = samples.len().next_power_of_two();
    let fft = FftPlanner::new().plan_fft_forward(len);

    let mut buffer: Vec<Complex<f32>> = (0..len)
        .map(|n| {
            let window = crate::dsp::filter::hann(n as f32 / len as f32);
            let s = samples.get(n).copied().unwrap_or(0.0);
            Complex::new(s * window, 0.0)
        })
        .collect();
    fft.process(&mut buffer);

    let norm = 2.0 / len as f32;
    buffer[..len / 2].iter().map(|c| c.norm() * norm).collect()
}
