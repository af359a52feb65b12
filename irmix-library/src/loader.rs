//! Impulse response file loading and decoding

use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, warn};

/// Most channels an impulse response keeps (extra channels are dropped)
pub const MAX_IR_CHANNELS: usize = 2;

/// Errors that can occur while loading an impulse response
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Unsupported format")]
    UnsupportedFormat,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("File contains no samples")]
    Empty,
}

/// A decoded impulse response
///
/// Samples are stored planar, one `Vec` per channel (1 or 2 channels), at the
/// rate the file was captured at. Loaded wholesale and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    path: Option<PathBuf>,
}

impl ImpulseResponse {
    /// Build an impulse response from planar channel data.
    ///
    /// Channels beyond the second are dropped and all channels are truncated
    /// to the shortest one.
    pub fn from_channels(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, LoadError> {
        channels.truncate(MAX_IR_CHANNELS);
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        if len == 0 {
            return Err(LoadError::Empty);
        }
        for ch in &mut channels {
            ch.truncate(len);
        }
        Ok(Self {
            channels,
            sample_rate,
            path: None,
        })
    }

    /// Attach the source file path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Number of stored channels (1 or 2)
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Length in frames
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Always false for a constructed response; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples of one channel. A mono response returns channel 0 for any index.
    pub fn channel(&self, index: usize) -> &[f32] {
        let index = index.min(self.channels.len() - 1);
        &self.channels[index]
    }

    /// Capture sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Source file, if loaded from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Display name (file stem)
    pub fn name(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
    }
}

/// Impulse response decoder using Symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct ImpulseLoader;

impl ImpulseLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self
    }

    /// Load and decode an impulse response file.
    ///
    /// The samples are kept at the file's own rate; rate matching happens when
    /// a convolution kernel is built from the response.
    pub fn load(&self, path: &Path) -> Result<ImpulseResponse, LoadError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                symphonia::core::errors::Error::Unsupported(_) => LoadError::UnsupportedFormat,
                other => LoadError::Decode(other.to_string()),
            })?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.unwrap_or(48000);
        let mut channel_count = codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|_| LoadError::UnsupportedFormat)?;

        let mut interleaved: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "stopping decode");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping undecodable packet");
                    continue;
                }
            };

            let spec = *decoded.spec();
            channel_count = spec.channels.count();

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(sample_buf.samples());
        }

        let channels = deinterleave(&interleaved, channel_count.max(1));
        let ir = ImpulseResponse::from_channels(channels, sample_rate)?.with_path(path);

        debug!(
            path = %path.display(),
            frames = ir.len(),
            channels = ir.num_channels(),
            sample_rate,
            "decoded impulse response"
        );

        Ok(ir)
    }
}

/// Split interleaved samples into at most `MAX_IR_CHANNELS` planar channels
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    (0..channels.min(MAX_IR_CHANNELS))
        .map(|ch| (0..frames).map(|f| samples[f * channels + ch]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[Vec<f32>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cab.wav");
        let frames: Vec<Vec<f32>> = (0..64).map(|i| vec![1.0 / (i as f32 + 1.0)]).collect();
        write_wav(&path, 1, 44100, &frames);

        let ir = ImpulseLoader::new().load(&path).unwrap();
        assert_eq!(ir.num_channels(), 1);
        assert_eq!(ir.len(), 64);
        assert_eq!(ir.sample_rate(), 44100);
        assert_eq!(ir.name().as_deref(), Some("cab"));
        assert!((ir.channel(0)[0] - 1.0).abs() < 1e-6);
        // Mono responses serve channel 0 for the right side too
        assert_eq!(ir.channel(1), ir.channel(0));
    }

    #[test]
    fn test_load_stereo_wav_keeps_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.wav");
        let frames: Vec<Vec<f32>> = (0..32).map(|i| vec![i as f32 * 0.01, -(i as f32) * 0.01]).collect();
        write_wav(&path, 2, 48000, &frames);

        let ir = ImpulseLoader::new().load(&path).unwrap();
        assert_eq!(ir.num_channels(), 2);
        assert!((ir.channel(0)[5] - 0.05).abs() < 1e-6);
        assert!((ir.channel(1)[5] + 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ImpulseLoader::new()
            .load(Path::new("/definitely/not/here.wav"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not a wave file at all").unwrap();
        assert!(ImpulseLoader::new().load(&path).is_err());
    }

    #[test]
    fn test_from_channels_truncates() {
        let ir = ImpulseResponse::from_channels(
            vec![vec![1.0, 2.0, 3.0], vec![1.0, 2.0], vec![9.0; 3]],
            48000,
        )
        .unwrap();
        assert_eq!(ir.num_channels(), 2);
        assert_eq!(ir.len(), 2);
        assert!(ImpulseResponse::from_channels(vec![], 48000).is_err());
    }
}
