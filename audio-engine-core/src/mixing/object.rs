use std::fmt;
use std::path::PathBuf;

use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::models::format::AudioFormat;
use crate::models::object_id::ObjectId;
use crate::traits::transform::AudioTransform;

use super::registry::ObjectRegistry;

/// What the mixer asks of an object in one render cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub frame_count: usize,
    /// The engine's render format.
    pub format: AudioFormat,
}

/// One object's contribution to a render cycle.
///
/// The chunk may hold fewer frames than requested; the mixer pads the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedChunk {
    pub buffer: SampleBuffer,
    /// The object reached the end of its data during this chunk.
    pub finished: bool,
}

/// Produces the next chunk of an object's audio. Runs on the render thread.
pub trait ChunkProducer: Send {
    fn produce(&mut self, object: &mut AudioObject, request: &RenderRequest) -> Result<RenderedChunk, EngineError>;
}

impl<F> ChunkProducer for F
where
    F: FnMut(&mut AudioObject, &RenderRequest) -> Result<RenderedChunk, EngineError> + Send,
{
    fn produce(&mut self, object: &mut AudioObject, request: &RenderRequest) -> Result<RenderedChunk, EngineError> {
        self(object, request)
    }
}

/// Snapshot delivered when an object has played its last pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedPlaying {
    pub id: ObjectId,
    pub name: String,
    pub file_path: Option<PathBuf>,
    /// `false` when the object is persistent and stays registered (paused).
    pub removed: bool,
}

/// Callback invoked when an object's play count is exhausted.
///
/// Receives the registry so it can queue follow-up objects; it runs without
/// the registry lock held.
pub type FinishedCallback = Box<dyn FnMut(&FinishedPlaying, &ObjectRegistry) + Send>;

/// One playable unit owned by the [`ObjectRegistry`].
pub struct AudioObject {
    id: ObjectId,
    pub name: String,
    pub file_path: Option<PathBuf>,
    /// Source samples.
    pub buffer: SampleBuffer,
    /// Read cursor into `buffer`, in frames.
    pub frame_index: usize,
    /// Passes left to play; `0` loops forever.
    pub play_count: u32,
    pub is_paused: bool,
    /// Linear gain. Values above `1.0` are allowed and may clip.
    pub volume: f32,
    /// Keep the object registered (paused and rewound) when it finishes.
    pub is_persistent: bool,
    /// Names of the registry categories whose volume applies to this object.
    pub categories: Vec<String>,
    pub(crate) producer: Option<Box<dyn ChunkProducer>>,
    pub(crate) on_finished: Option<FinishedCallback>,
    pub(crate) processor: Option<Box<dyn AudioTransform>>,
}

impl AudioObject {
    /// A full-volume object that plays `buffer` once.
    pub fn new(name: impl Into<String>, buffer: SampleBuffer) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            file_path: None,
            buffer,
            frame_index: 0,
            play_count: 1,
            is_paused: false,
            volume: 1.0,
            is_persistent: false,
            categories: Vec::new(),
            producer: None,
            on_finished: None,
            processor: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn with_play_count(mut self, play_count: u32) -> Self {
        self.play_count = play_count;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn paused(mut self, is_paused: bool) -> Self {
        self.is_paused = is_paused;
        self
    }

    pub fn persistent(mut self, is_persistent: bool) -> Self {
        self.is_persistent = is_persistent;
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Replace the chunk producer. Objects without one copy from `buffer`.
    pub fn set_producer(&mut self, producer: Box<dyn ChunkProducer>) {
        self.producer = Some(producer);
    }

    pub fn set_producer_fn<F>(&mut self, producer: F)
    where
        F: FnMut(&mut AudioObject, &RenderRequest) -> Result<RenderedChunk, EngineError> + Send + 'static,
    {
        self.producer = Some(Box::new(producer));
    }

    pub fn clear_producer(&mut self) {
        self.producer = None;
    }

    pub fn has_producer(&self) -> bool {
        self.producer.is_some()
    }

    pub fn set_on_finished<F>(&mut self, callback: F)
    where
        F: FnMut(&FinishedPlaying, &ObjectRegistry) + Send + 'static,
    {
        self.on_finished = Some(Box::new(callback));
    }

    /// Install a transform applied to every produced chunk before mixing.
    pub fn set_processor(&mut self, processor: Box<dyn AudioTransform>) {
        self.processor = Some(processor);
    }

    pub fn clear_processor(&mut self) {
        self.processor = None;
    }

    /// Playback progress in `[0.0, 1.0]`.
    pub fn position(&self) -> f64 {
        let frames = self.buffer.frame_count();
        if frames == 0 {
            return 0.0;
        }
        (self.frame_index as f64 / frames as f64).min(1.0)
    }

    pub fn set_position(&mut self, position: f64) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(EngineError::Configuration(format!(
                "position {} is outside [0, 1]",
                position
            )));
        }
        self.frame_index = (position * self.buffer.frame_count() as f64) as usize;
        Ok(())
    }

    /// Copy up to `request.frame_count` frames from the cursor and advance it.
    pub fn render_default(&mut self, request: &RenderRequest) -> Result<RenderedChunk, EngineError> {
        let buffer = self.buffer.sub_buffer(self.frame_index, request.frame_count)?;
        self.frame_index += buffer.frame_count();
        Ok(RenderedChunk {
            buffer,
            finished: self.frame_index >= self.buffer.frame_count(),
        })
    }

    pub(crate) fn finished_event(&self, removed: bool) -> FinishedPlaying {
        FinishedPlaying {
            id: self.id,
            name: self.name.clone(),
            file_path: self.file_path.clone(),
            removed,
        }
    }
}

impl fmt::Debug for AudioObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("file_path", &self.file_path)
            .field("frames", &self.buffer.frame_count())
            .field("frame_index", &self.frame_index)
            .field("play_count", &self.play_count)
            .field("is_paused", &self.is_paused)
            .field("volume", &self.volume)
            .field("is_persistent", &self.is_persistent)
            .field("categories", &self.categories)
            .field("has_producer", &self.producer.is_some())
            .field("has_processor", &self.processor.is_some())
            .finish()
    }
}
