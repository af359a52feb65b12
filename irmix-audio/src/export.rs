//! 24-bit WAV export of rendered impulses
//!
//! Files are written next to the destination under a temporary name and
//! renamed into place only once complete, so a failed export never leaves a
//! truncated file at the requested path.

use std::fs;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use tracing::{info, warn};

/// Bit depth of exported files
pub const EXPORT_BITS: u16 = 24;

/// Largest positive 24-bit sample value
const MAX_24BIT: f32 = 8_388_607.0;

/// Errors raised while writing an export
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Nothing to export")]
    NoChannels,
}

/// Temporary path used while `path` is being written
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export.wav".to_string());
    path.with_file_name(format!(".{name}.partial"))
}

#[inline]
fn to_24bit(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * MAX_24BIT).round() as i32
}

/// Write planar `channels` as a 24-bit integer WAV file at `path`.
///
/// Samples are clamped to [-1, 1].
pub fn write_wav_24(path: &Path, channels: &[Vec<f32>], sample_rate: u32) -> Result<(), ExportError> {
    if channels.is_empty() {
        return Err(ExportError::NoChannels);
    }

    let temp = partial_path(path);
    match write_frames(&temp, channels, sample_rate) {
        Ok(()) => {
            if let Err(e) = fs::rename(&temp, path) {
                let _ = fs::remove_file(&temp);
                return Err(e.into());
            }
            info!(
                path = %path.display(),
                channels = channels.len(),
                sample_rate,
                "exported impulse"
            );
            Ok(())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "export failed");
            let _ = fs::remove_file(&temp);
            Err(e)
        }
    }
}

fn write_frames(path: &Path, channels: &[Vec<f32>], sample_rate: u32) -> Result<(), ExportError> {
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: EXPORT_BITS,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    for f in 0..frames {
        for ch in channels {
            writer.write_sample(to_24bit(ch[f]))?;
        }
    }
    writer.finalize()?;
    Ok(())
}
