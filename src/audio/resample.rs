//! Sample-rate conversion using rubato.
//!
//! Generated buffers are mono loops, so conversion is circular: the input is
//! wrapped with its own tail in front and its head behind, and the output is
//! cut back to exactly one period. The result repeats with no seam.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{DaemonError, Result};
use crate::types::AudioBuffer;

/// Input frames of wrap-around context on each side, at ratio 1.
const WRAP_FRAMES: usize = 256;

/// Converts looping `buffer` to `output_rate`. Returns a clone when rates already match.
///
/// The output holds `round(len * output_rate / input_rate)` frames, and its
/// last frame leads continuously into its first.
pub fn resample(buffer: &AudioBuffer, output_rate: u32) -> Result<AudioBuffer> {
    let input_rate = buffer.sample_rate();
    if input_rate == output_rate {
        return Ok(buffer.clone());
    }
    if output_rate == 0 {
        return Err(DaemonError::Playback("device sample rate is zero".to_string()));
    }

    let input = buffer.samples();
    let ratio = output_rate as f64 / input_rate as f64;
    // Enough context that the filter delay never reaches real samples.
    let pad = WRAP_FRAMES.max((WRAP_FRAMES as f64 / ratio).ceil() as usize);
    let wrapped = wrap(input, pad);

    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        wrapped.len(),
        1,
    )
    .map_err(|e| DaemonError::Playback(format!("Failed to create resampler: {}", e)))?;
    let delay = resampler.output_delay();

    let mut planar = resampler
        .process(&[wrapped.as_slice()], None)
        .map_err(|e| DaemonError::Playback(format!("Resampling failed: {}", e)))?;
    let output = planar.pop().unwrap_or_default();

    let start = delay + (pad as f64 * ratio).round() as usize;
    let frames = ((input.len() as f64 * ratio).round() as usize).max(1);
    let period = output.get(start..start + frames).ok_or_else(|| {
        DaemonError::Playback(format!(
            "resampler produced {} frames, needed {}",
            output.len(),
            start + frames
        ))
    })?;

    debug!(
        from = input_rate,
        to = output_rate,
        frames_in = input.len(),
        frames_out = frames,
        delay,
        "resampled loop"
    );
    AudioBuffer::from_samples(period.to_vec(), output_rate)
}

/// `input` preceded by its last `pad` frames and followed by its first `pad`,
/// repeating the loop as often as needed for short buffers.
fn wrap(input: &[f32], pad: usize) -> Vec<f32> {
    let len = input.len();
    let lead = (len - pad % len) % len;
    (0..len + 2 * pad)
        .map(|i| input[(lead + i) % len])
        .collect()
}
