//! Zero-latency partitioned FFT convolution
//!
//! The impulse response is cut into partitions of `B` samples and each is
//! transformed once (FFT size `2B`) when the kernel is built. At run time every
//! completed input block is transformed and kept in a ring of past spectra;
//! the output of block `j` is the overlap-add of
//! `IFFT(sum_k X[j-k] * H[k])`. The block being filled is re-transformed on
//! each call, so output is available for every input sample as soon as it
//! arrives and the convolver adds no latency.
//!
//! Kernels are built (and FFT plans made) on the control thread; `process`
//! never allocates.

use std::sync::Arc;

use irmix_library::{resample_channels, ImpulseResponse, ResampleError};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

/// Samples below this level at the end of a response are trimmed (-100 dBFS)
const TRIM_THRESHOLD: f32 = 1e-5;

/// Smallest partition size
const MIN_PARTITION: usize = 32;

/// Frequency-domain impulse response ready for streaming convolution
pub struct ConvolutionKernel {
    source: Arc<ImpulseResponse>,
    sample_rate: u32,
    partition: usize,
    /// Kernel length in samples after rate matching and trimming
    len: usize,
    /// Partition spectra: [channel][partition][bin]
    spectra: Vec<Vec<Vec<Complex<f32>>>>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
}

impl ConvolutionKernel {
    /// Build a kernel from `ir` for processing at `sample_rate` in blocks of up
    /// to `max_block` frames.
    ///
    /// The response is resampled if its rate differs and trailing silence is
    /// trimmed. Leading samples are never touched, so the response onset (and
    /// with it the slot's timing) is preserved.
    pub fn build(
        ir: Arc<ImpulseResponse>,
        sample_rate: u32,
        max_block: usize,
    ) -> Result<Self, ResampleError> {
        let partition = max_block.max(1).next_power_of_two().max(MIN_PARTITION);
        let fft_size = partition * 2;

        let inputs: Vec<&[f32]> = (0..ir.num_channels()).map(|c| ir.channel(c)).collect();
        let mut channels = resample_channels(&inputs, ir.sample_rate(), sample_rate)?;
        let len = trim_trailing_silence(&mut channels);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let num_partitions = len.div_ceil(partition).max(1);
        let spectra = channels
            .iter()
            .map(|samples| {
                (0..num_partitions)
                    .map(|p| {
                        let start = (p * partition).min(samples.len());
                        let end = ((p + 1) * partition).min(samples.len());
                        let mut bins = vec![Complex::new(0.0, 0.0); fft_size];
                        for (bin, &s) in bins.iter_mut().zip(&samples[start..end]) {
                            bin.re = s;
                        }
                        fft.process(&mut bins);
                        bins
                    })
                    .collect()
            })
            .collect();

        debug!(
            source_rate = ir.sample_rate(),
            sample_rate,
            len,
            partition,
            partitions = num_partitions,
            "built convolution kernel"
        );

        Ok(Self {
            source: ir,
            sample_rate,
            partition,
            len,
            spectra,
            fft,
            ifft,
        })
    }

    /// Response this kernel was built from
    pub fn source(&self) -> &Arc<ImpulseResponse> {
        &self.source
    }

    /// Processing rate the kernel was built for
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Partition size in samples
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Kernel length in samples
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn num_partitions(&self) -> usize {
        self.spectra[0].len()
    }

    fn fft_size(&self) -> usize {
        self.partition * 2
    }

    /// Partition spectra for an output channel (mono kernels serve both sides)
    fn channel(&self, index: usize) -> &[Vec<Complex<f32>>] {
        &self.spectra[index.min(self.spectra.len() - 1)]
    }
}

/// Drop trailing samples quieter than the trim threshold on every channel.
/// Returns the new length (at least 1).
fn trim_trailing_silence(channels: &mut [Vec<f32>]) -> usize {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let last = (0..frames)
        .rev()
        .find(|&i| channels.iter().any(|c| c[i].abs() >= TRIM_THRESHOLD))
        .unwrap_or(0);
    let len = (last + 1).min(frames.max(1));
    for ch in channels.iter_mut() {
        ch.truncate(len);
    }
    len
}

/// Streaming state for one channel
struct ChannelState {
    /// Samples of the block being filled
    input: Vec<f32>,
    /// Ring of past input block spectra
    history: Vec<Vec<Complex<f32>>>,
    /// Ring slot for the block being filled
    head: usize,
    /// Contribution of past blocks to the current block's spectrum
    tail: Vec<Complex<f32>>,
    /// Second half of the previous block's output
    overlap: Vec<f32>,
}

impl ChannelState {
    fn new(partition: usize, partitions: usize) -> Self {
        let fft_size = partition * 2;
        Self {
            input: vec![0.0; partition],
            history: vec![vec![Complex::new(0.0, 0.0); fft_size]; partitions],
            head: 0,
            tail: vec![Complex::new(0.0, 0.0); fft_size],
            overlap: vec![0.0; partition],
        }
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        for spectrum in &mut self.history {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.head = 0;
        self.tail.fill(Complex::new(0.0, 0.0));
        self.overlap.fill(0.0);
    }

    /// Move to the next block and precompute its tail spectrum
    fn advance(&mut self, kernel: &[Vec<Complex<f32>>]) {
        let partitions = self.history.len();
        self.head = (self.head + 1) % partitions;
        self.tail.fill(Complex::new(0.0, 0.0));
        for (k, h) in kernel.iter().enumerate().skip(1) {
            let x = &self.history[(self.head + partitions - k) % partitions];
            for ((t, &xv), &hv) in self.tail.iter_mut().zip(x).zip(h) {
                *t += xv * hv;
            }
        }
    }
}

/// Stereo streaming convolver
pub struct Convolver {
    kernel: ConvolutionKernel,
    channels: [ChannelState; 2],
    work: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Fill position inside the current block
    pos: usize,
}

impl Convolver {
    /// Create a convolver around a built kernel
    pub fn new(kernel: ConvolutionKernel) -> Self {
        let partition = kernel.partition();
        let partitions = kernel.num_partitions();
        let scratch_len = kernel
            .fft
            .get_inplace_scratch_len()
            .max(kernel.ifft.get_inplace_scratch_len());
        Self {
            channels: [
                ChannelState::new(partition, partitions),
                ChannelState::new(partition, partitions),
            ],
            work: vec![Complex::new(0.0, 0.0); kernel.fft_size()],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            pos: 0,
            kernel,
        }
    }

    /// Build a kernel and wrap it in a convolver
    pub fn from_impulse(
        ir: Arc<ImpulseResponse>,
        sample_rate: u32,
        max_block: usize,
    ) -> Result<Self, ResampleError> {
        Ok(Self::new(ConvolutionKernel::build(ir, sample_rate, max_block)?))
    }

    pub fn kernel(&self) -> &ConvolutionKernel {
        &self.kernel
    }

    /// Clear all streaming history
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.reset();
        }
        self.pos = 0;
    }

    /// Convolve a stereo signal in place
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let partition = self.kernel.partition;
        let mut done = 0;

        while done < frames {
            let n = (partition - self.pos).min(frames - done);
            let completes = self.pos + n == partition;

            self.process_channel(0, &mut left[done..done + n], completes);
            self.process_channel(1, &mut right[done..done + n], completes);

            self.pos += n;
            done += n;

            if completes {
                for (c, state) in self.channels.iter_mut().enumerate() {
                    state.advance(self.kernel.channel(c));
                }
                self.pos = 0;
            }
        }
    }

    fn process_channel(&mut self, index: usize, samples: &mut [f32], completes: bool) {
        let partition = self.kernel.partition;
        let scale = 1.0 / self.kernel.fft_size() as f32;
        let pos = self.pos;
        let kernel = self.kernel.channel(index);
        let state = &mut self.channels[index];

        state.input[pos..pos + samples.len()].copy_from_slice(samples);

        for (w, &x) in self.work.iter_mut().zip(&state.input) {
            *w = Complex::new(x, 0.0);
        }
        self.work[partition..].fill(Complex::new(0.0, 0.0));
        self.kernel.fft.process_with_scratch(&mut self.work, &mut self.scratch);

        if completes {
            state.history[state.head].copy_from_slice(&self.work);
        }

        for ((w, &h), &t) in self.work.iter_mut().zip(&kernel[0]).zip(&state.tail) {
            *w = *w * h + t;
        }
        self.kernel.ifft.process_with_scratch(&mut self.work, &mut self.scratch);

        for (i, s) in samples.iter_mut().enumerate() {
            *s = self.work[pos + i].re * scale + state.overlap[pos + i];
        }

        if completes {
            for (o, w) in state.overlap.iter_mut().zip(&self.work[partition..]) {
                *o = w.re * scale;
            }
            state.input.fill(0.0);
        }
    }
}
