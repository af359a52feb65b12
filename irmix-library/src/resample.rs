//! Sample rate conversion for impulse responses
//!
//! Impulse responses are decoded at their capture rate. Before one can be used
//! as a convolution kernel at another processing rate it is converted here.
//! The resampler's own group delay is removed so that the converted response
//! starts at the same instant as the original; alignment between slots
//! captured at different rates depends on it.

use rubato::{FftFixedInOut, Resampler};
use thiserror::Error;

/// Frames fed to the resampler per call
const CHUNK_FRAMES: usize = 1024;

/// Errors raised while converting sample rates
#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("Resampler setup failed: {0}")]
    Setup(String),
    #[error("Resampling failed: {0}")]
    Process(String),
}

/// Convert planar channels from `source_rate` to `target_rate`.
///
/// Output length is `ceil(frames * target / source)`. Equal rates return a
/// copy of the input.
pub fn resample_channels(
    channels: &[&[f32]],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<Vec<f32>>, ResampleError> {
    if source_rate == target_rate || channels.is_empty() {
        return Ok(channels.iter().map(|c| c.to_vec()).collect());
    }

    let channel_count = channels.len();
    let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    let expected = (frames as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize;

    let mut resampler = FftFixedInOut::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        CHUNK_FRAMES,
        channel_count,
    )
    .map_err(|e| ResampleError::Setup(e.to_string()))?;

    let delay = resampler.output_delay();
    let wanted = delay + expected;

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channel_count];
    let mut chunk: Vec<Vec<f32>> = vec![Vec::new(); channel_count];
    let mut pos = 0;

    // Keep feeding (zero-padded past the end) until the delayed tail is out
    while output[0].len() < wanted {
        let chunk_size = resampler.input_frames_next();
        for (ch, buf) in chunk.iter_mut().enumerate() {
            buf.clear();
            let end = (pos + chunk_size).min(frames);
            if pos < end {
                buf.extend_from_slice(&channels[ch][pos..end]);
            }
            buf.resize(chunk_size, 0.0);
        }
        pos += chunk_size;

        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;

        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(data);
        }
    }

    Ok(output
        .into_iter()
        .map(|mut ch| {
            ch.truncate(wanted);
            ch.drain(..delay);
            ch
        })
        .collect())
}
