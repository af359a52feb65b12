//! Impulse response analysis for IRMix
//!
//! Provides cross-correlation based time alignment between impulse
//! responses loaded into the mixer slots.

mod alignment;

pub use alignment::{
    estimate_alignment, find_delay_offset, AlignInput, AlignmentResult, ALIGN_SLOTS, MAX_OFFSET_MS,
};
