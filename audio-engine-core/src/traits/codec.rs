use std::path::Path;

use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::models::format::AudioFormat;

/// Result of decoding a file: samples in the internal float encoding, plus
/// the format they were stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub buffer: SampleBuffer,
    pub source_format: AudioFormat,
}

/// Decode/encode capability for one container format.
///
/// Only called when objects are created and when saving; never from the
/// render or capture threads.
pub trait AudioCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case file extensions this codec handles, without the dot.
    fn extensions(&self) -> &[&str];

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions().iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedAudio, EngineError>;

    fn decode_file(&self, path: &Path) -> Result<DecodedAudio, EngineError> {
        let data = std::fs::read(path)
            .map_err(|e| EngineError::Storage(format!("failed to read {}: {}", path.display(), e)))?;
        self.decode(&data)
    }

    /// Encode `buffer` into `target` (encoding and bit depth; the buffer's
    /// own layout and rate are kept).
    fn encode(&self, buffer: &SampleBuffer, target: &AudioFormat) -> Result<Vec<u8>, EngineError>;
}
