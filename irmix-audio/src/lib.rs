//! Audio engine for IRMix - slots, tone chain, renderer, and export
//!
//! This module provides the IR mixing pipeline:
//! - Params: lock-free named parameters shared with the audio thread
//! - Convolver: zero-latency partitioned FFT convolution
//! - Slot: convolution, fractional delay, pan, and level per impulse
//! - Tone: six-stage biquad chain on the summed bus
//! - Renderer: real-time blocks and offline impulse renders
//! - Aligner: background cross-correlation worker
//! - Engine: control-thread facade and the audio-side processor

mod aligner;
mod convolver;
mod delay_line;
mod engine;
mod export;
mod gain;
mod params;
mod renderer;
mod slot;
mod tone;

pub use aligner::{AlignStart, Aligner, SHUTDOWN_TIMEOUT};
pub use convolver::{ConvolutionKernel, Convolver};
pub use delay_line::{DelayLine, LinearSmoother, DELAY_RAMP_SECS, MAX_DELAY_MS};
pub use engine::{EngineError, EngineEvent, IrMixEngine, MixProcessor, ProcessorCommand, EMPTY_SLOT_NAME};
pub use export::{write_wav_24, ExportError, EXPORT_BITS};
pub use gain::{db_to_gain, pan_gains, SILENCE_DB};
pub use params::{ParamHandle, ParamStore, SlotParams, ToneParams, NUM_SLOTS};
pub use renderer::{render_offline, MixRenderer, RenderSnapshot, RenderedImpulse, DEFAULT_RENDER_SECS, OFFLINE_BLOCK};
pub use slot::SlotEngine;
pub use tone::ToneEngine;
