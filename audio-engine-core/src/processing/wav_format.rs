//! WAV file format utilities.
//!
//! Generates the standard 44-byte RIFF header and parses headers of files
//! written by other tools, including `WAVE_FORMAT_EXTENSIBLE`.

use crate::models::error::EngineError;
use crate::models::format::{AudioFormat, ChannelLayout, SampleEncoding};

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Generate a 44-byte WAV RIFF header for `format`.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  format code (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let channels = format.channel_count();
    let byte_rate = format.byte_rate();
    let block_align = format.frame_size() as u16;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format.encoding.wave_tag().to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// A parsed WAV file: its format and the raw sample bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct WavContents<'a> {
    pub format: AudioFormat,
    pub data: &'a [u8],
}

/// Walk the RIFF chunks of `bytes`, returning the `fmt ` description and the
/// `data` payload. Unknown chunks are skipped.
pub fn parse_wav(bytes: &[u8]) -> Result<WavContents<'_>, EngineError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(EngineError::Codec("not a RIFF/WAVE file".into()));
    }

    let mut format = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4) as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size);

        if id == b"fmt " {
            if body_end > bytes.len() {
                return Err(EngineError::Codec("truncated fmt chunk".into()));
            }
            format = Some(parse_fmt(&bytes[body_start..body_end])?);
        } else if id == b"data" {
            let format = format.ok_or_else(|| EngineError::Codec("data chunk before fmt chunk".into()))?;
            // Streams written without a final size patch report more than is present.
            let data = &bytes[body_start..body_end.min(bytes.len())];
            return Ok(WavContents { format, data });
        }

        // Chunks are word aligned.
        offset = body_end.saturating_add(size & 1);
    }
    Err(EngineError::Codec("missing data chunk".into()))
}

fn parse_fmt(chunk: &[u8]) -> Result<AudioFormat, EngineError> {
    if chunk.len() < 16 {
        return Err(EngineError::Codec("fmt chunk too short".into()));
    }
    let mut tag = read_u16(chunk, 0);
    let channels = read_u16(chunk, 2);
    let sample_rate = read_u32(chunk, 4);
    let bits = read_u16(chunk, 14);
    let mut layout = ChannelLayout::from_count(channels);

    if tag == WAVE_FORMAT_EXTENSIBLE {
        if chunk.len() < 40 {
            return Err(EngineError::Codec("extensible fmt chunk too short".into()));
        }
        layout = ChannelLayout::new(channels, read_u32(chunk, 20));
        // First two bytes of the sub-format GUID carry the real tag.
        tag = read_u16(chunk, 24);
    }

    let encoding = SampleEncoding::from_wave_tag(tag)
        .ok_or_else(|| EngineError::UnsupportedFormat(format!("WAVE format tag {:#06x}", tag)))?;
    let format = AudioFormat::new(encoding, bits, layout, sample_rate);
    format
        .validate()
        .map_err(|e| EngineError::Codec(format!("invalid fmt chunk: {}", e)))?;
    Ok(format)
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
