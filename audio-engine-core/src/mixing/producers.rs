use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::processing::convert;

use super::object::{AudioObject, ChunkProducer, RenderRequest, RenderedChunk};

/// Chunk producer that converts the object's source to the render format on
/// the fly.
///
/// Resamples by linear interpolation and rematrixes to the render layout.
/// The fractional source position left over after each chunk is carried
/// into the next one, so consecutive chunks join without a seam and the
/// whole source is played at exactly the target rate. Moving the object's
/// cursor from outside restarts interpolation at the new position.
#[derive(Debug, Clone, Default)]
pub struct MatchFormatProducer {
    /// Source position past `frame_index`, in units of 1/`rate` frames.
    phase: u64,
    /// Target rate `phase` is counted in.
    rate: u32,
    /// Cursor left behind by the previous call.
    cursor: Option<usize>,
}

impl MatchFormatProducer {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.phase = 0;
        self.cursor = None;
    }
}

impl ChunkProducer for MatchFormatProducer {
    fn produce(&mut self, object: &mut AudioObject, request: &RenderRequest) -> Result<RenderedChunk, EngineError> {
        let source_rate = object.buffer.sample_rate();
        let target_rate = request.format.sample_rate;
        let target_layout = request.format.channel_layout;
        if source_rate == target_rate && object.buffer.channel_layout() == target_layout {
            self.reset();
            return object.render_default(request);
        }
        if source_rate == 0 || target_rate == 0 {
            return Err(EngineError::Configuration("cannot convert from or to a zero sample rate".into()));
        }

        let frames = object.buffer.frame_count();
        if object.frame_index >= frames {
            self.reset();
            object.frame_index = frames;
            return Ok(RenderedChunk {
                buffer: SampleBuffer::empty(target_layout, target_rate),
                finished: true,
            });
        }
        if self.cursor != Some(object.frame_index) || self.rate != target_rate {
            self.phase = 0;
            self.rate = target_rate;
        }

        let step = source_rate as u64;
        let denominator = target_rate as u64;
        let channels = object.buffer.channel_count();
        let mut samples = Vec::with_capacity(request.frame_count * channels);
        let mut produced = 0;
        while produced < request.frame_count {
            let offset = self.phase + produced as u64 * step;
            let index = object.frame_index + (offset / denominator) as usize;
            if index >= frames {
                break;
            }
            let fraction = (offset % denominator) as f32 / denominator as f32;
            let current = object.buffer.frame(index);
            let next = object.buffer.frame((index + 1).min(frames - 1));
            samples.extend(current.iter().zip(next).map(|(a, b)| a + (b - a) * fraction));
            produced += 1;
        }

        let end = self.phase + produced as u64 * step;
        object.frame_index += (end / denominator) as usize;
        let finished = object.frame_index >= frames;
        if finished {
            object.frame_index = frames;
            self.phase = 0;
        } else {
            self.phase = end % denominator;
        }
        self.cursor = Some(object.frame_index);

        let mut buffer = SampleBuffer::from_samples(samples, object.buffer.channel_layout(), target_rate)?;
        if buffer.channel_layout() != target_layout {
            buffer = convert::rematrix(&buffer, target_layout)?;
        }
        Ok(RenderedChunk { buffer, finished })
    }
}
