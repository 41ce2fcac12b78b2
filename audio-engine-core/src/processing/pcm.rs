use crate::models::error::EngineError;
use crate::models::format::{AudioFormat, SampleEncoding};

/// Convert f32 samples `[-1.0, 1.0]` to little-endian bytes in `format`'s
/// encoding and bit depth. Out-of-range values are clamped.
pub fn encode_samples(samples: &[f32], format: &AudioFormat) -> Result<Vec<u8>, EngineError> {
    let bytes_per_sample = format.bits_per_sample as usize / 8;
    let mut data = Vec::new();
    data.try_reserve_exact(samples.len() * bytes_per_sample)
        .map_err(|e| EngineError::ResourceExhausted(format!("failed to allocate encode buffer: {}", e)))?;

    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::Pcm, 8) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * i8::MAX as f32) as i8;
                data.push((value as i16 + 128) as u8);
            }
        }
        (SampleEncoding::Pcm, 16) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        (SampleEncoding::Pcm, 24) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) as f64 * I24_MAX as f64) as i32;
                data.extend_from_slice(&value.to_le_bytes()[..3]);
            }
        }
        (SampleEncoding::Pcm, 32) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        (SampleEncoding::IeeeFloat, 32) => {
            for &sample in samples {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        (SampleEncoding::IeeeFloat, 64) => {
            for &sample in samples {
                data.extend_from_slice(&(sample as f64).to_le_bytes());
            }
        }
        (encoding, bits) => {
            return Err(EngineError::UnsupportedFormat(format!(
                "cannot encode {:?} at {} bits",
                encoding, bits
            )))
        }
    }
    Ok(data)
}

/// Inverse of [`encode_samples`]. Trailing bytes that do not form a whole
/// sample are ignored.
pub fn decode_samples(data: &[u8], format: &AudioFormat) -> Result<Vec<f32>, EngineError> {
    let bytes_per_sample = format.bits_per_sample as usize / 8;
    if bytes_per_sample == 0 {
        return Err(EngineError::UnsupportedFormat("zero-width samples".into()));
    }
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(data.len() / bytes_per_sample)
        .map_err(|e| EngineError::ResourceExhausted(format!("failed to allocate decode buffer: {}", e)))?;
    let chunks = data.chunks_exact(bytes_per_sample);

    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::Pcm, 8) => {
            samples.extend(chunks.map(|b| (b[0] as i16 - 128) as f32 / i8::MAX as f32));
        }
        (SampleEncoding::Pcm, 16) => {
            samples.extend(chunks.map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32));
        }
        (SampleEncoding::Pcm, 24) => {
            samples.extend(chunks.map(|b| {
                // Sign-extend through the top byte.
                let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                (value as f64 / I24_MAX as f64) as f32
            }));
        }
        (SampleEncoding::Pcm, 32) => {
            samples.extend(
                chunks.map(|b| (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / i32::MAX as f64) as f32),
            );
        }
        (SampleEncoding::IeeeFloat, 32) => {
            samples.extend(chunks.map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])));
        }
        (SampleEncoding::IeeeFloat, 64) => {
            samples.extend(chunks.map(|b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }));
        }
        (encoding, bits) => {
            return Err(EngineError::UnsupportedFormat(format!(
                "cannot decode {:?} at {} bits",
                encoding, bits
            )))
        }
    }
    for sample in &mut samples {
        *sample = sample.clamp(-1.0, 1.0);
    }
    Ok(samples)
}

const I24_MAX: i32 = 0x7F_FFFF;
