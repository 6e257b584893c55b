use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

/*
Uniform partitioned convolution (overlap-save)
==============================================

Direct convolution against a 2.5 s impulse response is ~120k multiplies per
sample — hopeless in real time. The standard trick is to chop the IR into
equal partitions, keep a frequency-domain delay line of recent input
spectra, and do the whole thing as complex multiply-accumulate:

  input block x_k  ── FFT ──> X_k  (pushed into the history ring)

  Y_k = Σ_j  X_{k-j} · H_j          (one complex MAC pass per partition)

  y_k = last half of IFFT(Y_k)      (overlap-save discards the first half)

With partition size B the FFT length is 2B and the convolver reports B
samples of latency. The engine hides that inside the late-reverb pre-delay.

Kernels are immutable once built: a new decay time means the control path
builds a whole replacement `Convolver` and swaps it in while the late path
is muted, so the render path never runs an FFT plan it didn't start with.
*/

/// Default partition size. 256 samples ≈ 5.3 ms at 48 kHz.
pub const DEFAULT_PARTITION: usize = 256;

type Spectrum = Vec<Complex<f32>>;

/// Streaming FFT convolver with a fixed kernel.
pub struct Convolver {
    block: usize,
    fft_len: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    partitions: Vec<Spectrum>,
    history: Vec<Spectrum>,
    head: usize,
    input_pair: Vec<f32>,
    in_fill: usize,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    out_fifo: VecDeque<f32>,
}

impl Convolver {
    /// Build a convolver for `impulse` using `block`-sample partitions.
    /// All allocation and FFT planning happens here, on the control path.
    pub fn new(impulse: &[f32], block: usize) -> Self {
        let block = block.max(16).next_power_of_two();
        let fft_len = block * 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        // Partition the IR and transform each zero-padded block once.
        let impulse = if impulse.is_empty() { &[0.0][..] } else { impulse };
        let mut partitions = Vec::with_capacity(impulse.len().div_ceil(block));
        for chunk in impulse.chunks(block) {
            let mut spectrum = vec![Complex::new(0.0, 0.0); fft_len];
            for (slot, &s) in spectrum.iter_mut().zip(chunk.iter()) {
                slot.re = s;
            }
            fft.process(&mut spectrum);
            partitions.push(spectrum);
        }

        let history = vec![vec![Complex::new(0.0, 0.0); fft_len]; partitions.len()];
        let mut out_fifo = VecDeque::with_capacity(fft_len + 2);
        // Prime with one block of silence: the reported latency.
        out_fifo.extend(std::iter::repeat(0.0).take(block));

        Self {
            block,
            fft_len,
            fft,
            ifft,
            partitions,
            history,
            head: 0,
            input_pair: vec![0.0; fft_len],
            in_fill: 0,
            accum: vec![Complex::new(0.0, 0.0); fft_len],
            scratch: vec![Complex::new(0.0, 0.0); fft_len],
            out_fifo,
        }
    }

    /// Latency introduced by the partition buffering, in samples.
    pub fn latency(&self) -> usize {
        self.block
    }

    pub fn impulse_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Convolve a block of arbitrary length. `input` and `output` must be
    /// the same length; allocation-free after construction.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        for (out, &x) in output.iter_mut().zip(input.iter()) {
            self.input_pair[self.block + self.in_fill] = x;
            self.in_fill += 1;
            if self.in_fill == self.block {
                self.run_partition_block();
                self.in_fill = 0;
            }
            *out = self.out_fifo.pop_front().unwrap_or(0.0);
        }
    }

    fn run_partition_block(&mut self) {
        // Transform [previous block | current block].
        for (slot, &x) in self.scratch.iter_mut().zip(self.input_pair.iter()) {
            *slot = Complex::new(x, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let count = self.partitions.len();
        self.head = (self.head + count - 1) % count;
        self.history[self.head].copy_from_slice(&self.scratch);

        // Frequency-domain MAC over every partition.
        self.accum.fill(Complex::new(0.0, 0.0));
        for (j, partition) in self.partitions.iter().enumerate() {
            let spectrum = &self.history[(self.head + j) % count];
            for ((acc, &x), &h) in self
                .accum
                .iter_mut()
                .zip(spectrum.iter())
                .zip(partition.iter())
            {
                *acc += x * h;
            }
        }

        self.ifft.process(&mut self.accum);
        let norm = 1.0 / self.fft_len as f32;
        for k in self.block..self.fft_len {
            self.out_fifo.push_back(self.accum[k].re * norm);
        }

        // Current half becomes the previous half for the next block.
        self.input_pair.copy_within(self.block.., 0);
    }

    pub fn reset(&mut self) {
        for spectrum in &mut self.history {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.input_pair.fill(0.0);
        self.in_fill = 0;
        self.head = 0;
        self.out_fifo.clear();
        self.out_fifo.extend(std::iter::repeat(0.0).take(self.block));
    }
}
