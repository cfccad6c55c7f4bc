//! WAV file writer for rendered loops.
//!
//! Writes mono 32-bit float WAV using the hound crate.

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{DaemonError, Result};
use crate::playback::PlaybackTarget;
use crate::types::AudioBuffer;

/// Number of channels written (mono, matching generated buffers).
pub const CHANNELS: u16 = 1;

fn spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

fn write_samples<W: Write + Seek>(writer: WavWriter<W>, samples: &[f32]) -> Result<()> {
    let mut writer = writer;
    for sample in samples {
        writer
            .write_sample(*sample)
            .map_err(|e| DaemonError::Playback(format!("Failed to write sample: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| DaemonError::Playback(format!("Failed to finalize WAV: {}", e)))
}

/// Writes a buffer to a WAV file at its own sample rate.
///
/// ```ignore
/// use lofi_loop::audio::write_wav;
///
/// write_wav(&buffer, Path::new("/tmp/loop.wav"))?;
/// ```
pub fn write_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let writer = WavWriter::create(path, spec(buffer.sample_rate())).map_err(|e| {
        DaemonError::Playback(format!("Failed to create {}: {}", path.display(), e))
    })?;
    write_samples(writer, buffer.samples())
}

/// Renders each played buffer to a WAV file instead of a device.
#[derive(Debug, Clone)]
pub struct WavTarget {
    path: PathBuf,
}

impl WavTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PlaybackTarget for WavTarget {
    fn play(&self, buffer: &AudioBuffer) -> Result<()> {
        write_wav(buffer, &self.path)?;
        tracing::info!(
            path = %self.path.display(),
            secs = buffer.duration_sec(),
            "loop written"
        );
        Ok(())
    }

    fn stop(&self) {}
}

/// Calculates the duration of audio in seconds from sample count.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> f32 {
    sample_count as f32 / sample_rate as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn buffer() -> AudioBuffer {
        AudioBuffer::from_samples(vec![0.0, 0.5, -0.5, 0.0], 32000).unwrap()
    }

    #[test]
    fn write_wav_creates_mono_float_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_wav(&buffer(), &path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 32000);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 0.0]);
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("loop.wav");
        assert!(write_wav(&buffer(), &path).is_err());
    }

    #[test]
    fn wav_target_writes_on_play() {
        let dir = tempdir().unwrap();
        let target = WavTarget::new(dir.path().join("out.wav"));
        target.play(&buffer()).unwrap();
        target.stop();
        assert!(target.path().exists());
    }

    #[test]
    fn samples_to_duration_calculation() {
        assert_eq!(samples_to_duration(32000, 32000), 1.0);
        assert_eq!(samples_to_duration(16000, 32000), 0.5);
    }
}
