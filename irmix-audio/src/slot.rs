//! One impulse response slot: convolution, delay, pan, and level
//!
//! A slot reads its parameters through shared handles; it never writes them.
//! Convolvers are built off the audio thread and handed over with
//! [`SlotEngine::install`], which swaps without allocating.

use std::sync::Arc;

use irmix_library::{ImpulseResponse, ResampleError};
use tracing::debug;

use crate::convolver::Convolver;
use crate::delay_line::{DelayLine, LinearSmoother, DELAY_RAMP_SECS};
use crate::gain::{db_to_gain, pan_gains};
use crate::params::SlotParams;

/// Processing chain for one slot
pub struct SlotEngine {
    index: usize,
    params: SlotParams,
    sample_rate: u32,
    max_block: usize,
    convolver: Option<Box<Convolver>>,
    delay: DelayLine,
    delay_smoother: LinearSmoother,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl SlotEngine {
    /// Create an unprepared, empty slot
    pub fn new(index: usize, params: SlotParams) -> Self {
        Self {
            index,
            params,
            sample_rate: 0,
            max_block: 0,
            convolver: None,
            delay: DelayLine::new(1),
            delay_smoother: LinearSmoother::new(0, DELAY_RAMP_SECS),
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Allocate buffers for `sample_rate` / `max_block`.
    ///
    /// A loaded kernel built for a different rate or block size is rebuilt
    /// from its source response.
    pub fn prepare(&mut self, sample_rate: u32, max_block: usize) -> Result<(), ResampleError> {
        let changed = sample_rate != self.sample_rate || max_block != self.max_block;
        self.sample_rate = sample_rate;
        self.max_block = max_block;
        self.delay = DelayLine::for_sample_rate(sample_rate);
        self.delay_smoother = LinearSmoother::new(sample_rate, DELAY_RAMP_SECS);
        self.left = vec![0.0; max_block];
        self.right = vec![0.0; max_block];

        if changed {
            if let Some(conv) = self.convolver.take() {
                let source = Arc::clone(conv.kernel().source());
                debug!(slot = self.index, sample_rate, max_block, "rebuilding kernel");
                self.convolver = Some(Box::new(Convolver::from_impulse(source, sample_rate, max_block)?));
            }
        }

        self.reset();
        Ok(())
    }

    /// Clear convolution and delay history; the delay jumps to its target
    pub fn reset(&mut self) {
        if let Some(conv) = self.convolver.as_mut() {
            conv.reset();
        }
        self.delay.reset();
        self.delay_smoother.snap_to(self.target_delay_samples());
    }

    /// Build a kernel for `ir` at the prepared rate and install it.
    /// Returns the convolver that was replaced.
    pub fn load_impulse(
        &mut self,
        ir: Arc<ImpulseResponse>,
    ) -> Result<Option<Box<Convolver>>, ResampleError> {
        let conv = Convolver::from_impulse(ir, self.sample_rate, self.max_block)?;
        Ok(self.install(Box::new(conv)))
    }

    /// Swap in a ready convolver. Real-time safe; the previous one is
    /// returned so the caller can dispose of it off the audio thread.
    pub fn install(&mut self, convolver: Box<Convolver>) -> Option<Box<Convolver>> {
        let previous = self.convolver.replace(convolver);
        self.reset();
        previous
    }

    /// Remove the loaded convolver, returning it for disposal
    pub fn take(&mut self) -> Option<Box<Convolver>> {
        let previous = self.convolver.take();
        self.delay.reset();
        previous
    }

    pub fn is_loaded(&self) -> bool {
        self.convolver.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.params.mute.is_on()
    }

    pub fn is_soloed(&self) -> bool {
        self.params.solo.is_on()
    }

    /// Response behind the loaded kernel
    pub fn impulse(&self) -> Option<&Arc<ImpulseResponse>> {
        self.convolver.as_ref().map(|c| c.kernel().source())
    }

    /// Total delay (user + alignment) in samples at the prepared rate
    fn target_delay_samples(&self) -> f32 {
        let ms = self.params.delay_ms.get() + self.params.align_ms.get();
        ms * self.sample_rate as f32 / 1000.0
    }

    /// Run `frames` frames of `input` (interleaved, `channels` wide) through
    /// the slot and add the result to the interleaved stereo `bus`.
    ///
    /// Mono input feeds both sides; channels past the second are ignored.
    /// An empty or muted slot contributes nothing.
    pub fn process(&mut self, input: &[f32], channels: usize, bus: &mut [f32]) {
        if self.is_muted() {
            return;
        }
        let Some(conv) = self.convolver.as_mut() else {
            return;
        };

        let channels = channels.max(1);
        let frames = (input.len() / channels)
            .min(bus.len() / 2)
            .min(self.max_block);

        for (f, frame) in input.chunks_exact(channels).take(frames).enumerate() {
            self.left[f] = frame[0];
            self.right[f] = if channels > 1 { frame[1] } else { frame[0] };
        }

        conv.process(&mut self.left[..frames], &mut self.right[..frames]);

        let target = self.target_delay_samples();
        self.delay_smoother.set_target(target);

        let (pan_l, pan_r) = pan_gains(self.params.pan.get());
        let level = db_to_gain(self.params.level_db.get());
        let gain_l = pan_l * level;
        let gain_r = pan_r * level;

        for (f, out) in bus.chunks_exact_mut(2).take(frames).enumerate() {
            let delay = self.delay_smoother.next_value();
            let (l, r) = self.delay.process(self.left[f], self.right[f], delay);
            out[0] += l * gain_l;
            out[1] += r * gain_r;
        }
    }
}
