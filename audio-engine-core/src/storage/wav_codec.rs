use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::models::format::{AudioFormat, SampleEncoding};
use crate::processing::{pcm, wav_format};
use crate::traits::codec::{AudioCodec, DecodedAudio};

/// RIFF/WAVE codec.
///
/// Decodes PCM 8/16/24/32-bit and IEEE float 32/64 (plain or
/// `WAVE_FORMAT_EXTENSIBLE`); encodes PCM 8/16/24/32 and float 32 with the
/// standard 44-byte header.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavCodec;

impl AudioCodec for WavCodec {
    fn name(&self) -> &str {
        "wav"
    }

    fn extensions(&self) -> &[&str] {
        &["wav", "wave"]
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedAudio, EngineError> {
        let contents = wav_format::parse_wav(data)?;
        let format = contents.format;
        let samples = pcm::decode_samples(contents.data, &format)?;

        // Drop a trailing partial frame rather than reject the file.
        let channels = format.channel_count() as usize;
        let mut samples = samples;
        samples.truncate(samples.len() - samples.len() % channels);

        let buffer = SampleBuffer::from_samples(samples, format.channel_layout, format.sample_rate)?;
        Ok(DecodedAudio {
            buffer,
            source_format: format,
        })
    }

    fn encode(&self, buffer: &SampleBuffer, target: &AudioFormat) -> Result<Vec<u8>, EngineError> {
        let format = AudioFormat::new(
            target.encoding,
            target.bits_per_sample,
            buffer.channel_layout(),
            buffer.sample_rate(),
        );
        format.validate()?;
        if format.encoding == SampleEncoding::IeeeFloat && format.bits_per_sample != 32 {
            return Err(EngineError::UnsupportedFormat("WAV float output is 32-bit only".into()));
        }

        let data = pcm::encode_samples(buffer.samples(), &format)?;
        let data_size = u32::try_from(data.len())
            .map_err(|_| EngineError::UnsupportedFormat("audio too long for a WAV file".into()))?;

        let mut file = Vec::with_capacity(wav_format::WAV_HEADER_SIZE + data.len());
        file.extend_from_slice(&wav_format::generate_wav_header(&format, data_size));
        file.extend_from_slice(&data);
        Ok(file)
    }
}
