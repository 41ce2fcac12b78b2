use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;

/// In-place buffer transform (resampling, effects, ...).
///
/// Applied either by callers before playback or live as an object's
/// processing hook, in which case it runs on the render thread.
pub trait AudioTransform: Send {
    fn process(&mut self, buffer: &mut SampleBuffer) -> Result<(), EngineError>;
}

impl<F> AudioTransform for F
where
    F: FnMut(&mut SampleBuffer) -> Result<(), EngineError> + Send,
{
    fn process(&mut self, buffer: &mut SampleBuffer) -> Result<(), EngineError> {
        self(buffer)
    }
}
