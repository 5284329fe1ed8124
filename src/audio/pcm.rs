//! PCM16 little-endian <-> `f32` conversion for the realtime socket.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Result, WidgetError};

/// Decode a base64 PCM16 LE payload into samples in `[-1, 1]`.
///
/// # Errors
///
/// Returns [`WidgetError::Protocol`] if the payload is not valid base64.
pub fn decode_base64_pcm16(payload: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| WidgetError::Protocol(format!("invalid audio payload: {e}")))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect())
}

/// Encode samples as base64 PCM16 LE, clamping to `[-1, 1]`.
pub fn encode_base64_pcm16(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Linear-interpolation resample of mono audio from `from_rate` to `to_rate`.
///
/// Equal or zero rates return the input unchanged.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / step).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let left = (pos.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let t = (pos - left as f64).clamp(0.0, 1.0) as f32;
            samples[left] * (1.0 - t) + samples[right] * t
        })
        .collect()
}
