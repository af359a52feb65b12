//! Cross-correlation time alignment for impulse responses
//!
//! Estimates, for every loaded slot except a reference, how far the slot must
//! be delayed so that its early transient lines up with the reference. Only
//! the first few milliseconds of each response are examined: that is where
//! the direct sound of a cabinet or room capture sits.

use tracing::debug;

/// Number of slots covered by one alignment pass
pub const ALIGN_SLOTS: usize = 4;

/// Analysis window and lag search radius, in seconds (5 ms)
const WINDOW_SECS: f64 = 0.005;

/// Largest offset that will ever be reported, in milliseconds
pub const MAX_OFFSET_MS: f64 = 10.0;

/// Borrowed view of one slot's impulse response for analysis
#[derive(Debug, Clone, Copy)]
pub struct AlignInput<'a> {
    /// Channel 0 of the impulse response
    pub samples: &'a [f32],
    /// Rate the impulse was captured at
    pub sample_rate: f64,
}

/// Complete set of per-slot offsets produced by one pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignmentResult {
    /// Offset to apply to each slot, in milliseconds, within [0, MAX_OFFSET_MS]
    pub offsets_ms: [f64; ALIGN_SLOTS],
    /// Index of the slot used as time reference (None if nothing was loaded)
    pub reference: Option<usize>,
}

impl AlignmentResult {
    /// Result for a pass with no loaded slots
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Find the delay (ms) that best aligns `target` to `reference`.
///
/// Time-domain cross-correlation over the first 5 ms of both buffers. For each
/// integer lag the correlation is the mean product over the overlapping
/// samples only. The first lag reaching the maximum wins, so ties resolve to
/// the most negative lag. The result is clamped to `[0, MAX_OFFSET_MS]`: a
/// target that arrives earlier than the reference cannot be advanced.
pub fn find_delay_offset(reference: &[f32], target: &[f32], sample_rate: f64) -> f64 {
    let span = (sample_rate * WINDOW_SECS) as usize;
    let window = span.min(reference.len()).min(target.len());
    if window < 2 {
        return 0.0;
    }

    let max_lag = span.min(window - 1) as isize;
    let target_len = target.len() as isize;

    let mut best_corr = f64::NEG_INFINITY;
    let mut best_lag = 0isize;

    for lag in -max_lag..=max_lag {
        let mut sum = 0.0f64;
        let mut count = 0usize;

        for (i, &r) in reference[..window].iter().enumerate() {
            let j = i as isize + lag;
            if j >= 0 && j < target_len {
                sum += r as f64 * target[j as usize] as f64;
                count += 1;
            }
        }

        if count > 0 {
            sum /= count as f64;
        }

        if sum > best_corr {
            best_corr = sum;
            best_lag = lag;
        }
    }

    let delay_ms = best_lag as f64 / sample_rate * 1000.0;
    delay_ms.clamp(0.0, MAX_OFFSET_MS)
}

/// Run a full alignment pass over up to four slots.
///
/// The first loaded slot (ascending index) is the reference and always gets
/// 0; unloaded slots get 0. `should_stop` is polled between slots and an
/// abandoned pass returns `None` so nothing partial is ever published.
pub fn estimate_alignment<F>(
    inputs: &[Option<AlignInput<'_>>; ALIGN_SLOTS],
    should_stop: F,
) -> Option<AlignmentResult>
where
    F: Fn() -> bool,
{
    let Some(ref_index) = inputs.iter().position(Option::is_some) else {
        return Some(AlignmentResult::empty());
    };

    let reference = inputs[ref_index]?;
    let mut result = AlignmentResult {
        offsets_ms: [0.0; ALIGN_SLOTS],
        reference: Some(ref_index),
    };

    for (index, input) in inputs.iter().enumerate() {
        if should_stop() {
            return None;
        }
        if index == ref_index {
            continue;
        }
        if let Some(target) = input {
            // Lags are counted in reference-rate samples
            let offset = find_delay_offset(reference.samples, target.samples, reference.sample_rate);
            debug!(slot = index, reference = ref_index, offset_ms = offset, "alignment offset");
            result.offsets_ms[index] = offset;
        }
    }

    Some(result)
}
