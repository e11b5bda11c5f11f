//! PCM16 conversions for the realtime audio lanes.
//!
//! The realtime service speaks mono PCM16 little-endian at 24 kHz, base64
//! encoded inside JSON frames.

use base64::Engine;

pub const REALTIME_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Decodes base64 PCM16 into f32 samples in `-1.0..=1.0`.
pub fn decode_f32_from_base64_i16(fragment: &str) -> Vec<f32> {
    convert_i16_to_f32(&decode_i16(fragment))
}

/// Encodes PCM16 samples as base64 little-endian bytes.
pub fn encode_i16(pcm16: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(i16_to_le_bytes(pcm16))
}

pub fn decode_i16(fragment: &str) -> Vec<i16> {
    match base64::engine::general_purpose::STANDARD.decode(fragment) {
        Ok(bytes) => le_bytes_to_i16(&bytes),
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable audio fragment");
            Vec::new()
        }
    }
}

pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| (sample as f32 / 32768.0).clamp(-1.0, 1.0))
        .collect()
}

/// Interprets raw bytes as PCM16 LE. A trailing odd byte is ignored.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn i16_to_le_bytes(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}
