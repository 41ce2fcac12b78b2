use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::buffer::SampleBuffer;
use crate::models::device::AudioDevice;
use crate::models::error::EngineError;
use crate::models::format::AudioFormat;

/// What a backend actually opened in response to an open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedStream {
    pub device: AudioDevice,
    pub format: AudioFormat,
}

/// Opaque, API-specific knobs (buffer duration, sharing mode, ...).
///
/// The engine never interprets these; it forwards them to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendTuning(Map<String, Value>);

impl BackendTuning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copy every entry of `other` over this one.
    pub fn merge(&mut self, other: &BackendTuning) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Capability interface a native audio API implements for the engine.
///
/// One implementation per platform API. All methods take `&self`; backends
/// keep their stream state behind interior mutability because the engine
/// calls in from its render, capture and watchdog threads concurrently.
///
/// Failures are reported as [`EngineError::Device`]. Errors returned from
/// [`render_frames_ready`](Self::render_frames_ready),
/// [`write_render`](Self::write_render) or
/// [`read_capture`](Self::read_capture) stop the corresponding engine stream.
pub trait AudioBackend: Send + Sync {
    /// Human-readable API name, used in logs.
    fn name(&self) -> &str;

    /// Current render and capture devices with their default flags.
    fn enumerate_devices(&self) -> Result<Vec<AudioDevice>, EngineError>;

    /// Open the render stream. `None` means the system default device.
    ///
    /// The returned format may differ from the request.
    fn open_render(
        &self,
        device: Option<&AudioDevice>,
        format: &AudioFormat,
    ) -> Result<OpenedStream, EngineError>;

    fn close_render(&self) -> Result<(), EngineError>;

    /// Block for at most `timeout` until the device can accept frames.
    ///
    /// Returns how many frames can be written; `0` means the wait timed out.
    fn render_frames_ready(&self, timeout: Duration) -> Result<usize, EngineError>;

    /// Queue one mixed chunk. The chunk is in the internal float encoding with
    /// the layout and rate of the opened format; the backend converts it to
    /// the device encoding.
    fn write_render(&self, chunk: &SampleBuffer) -> Result<(), EngineError>;

    /// Open the capture stream. `None` means the system default device.
    fn open_capture(
        &self,
        device: Option<&AudioDevice>,
        format: &AudioFormat,
    ) -> Result<OpenedStream, EngineError>;

    fn close_capture(&self) -> Result<(), EngineError>;

    /// Block for at most `timeout` for captured audio.
    ///
    /// Returns `None` when nothing arrived in time.
    fn read_capture(&self, timeout: Duration) -> Result<Option<SampleBuffer>, EngineError>;

    /// Device-level output gain in `[0.0, 1.0]`.
    fn output_gain(&self) -> Result<f32, EngineError>;

    fn set_output_gain(&self, gain: f32) -> Result<(), EngineError>;

    fn tuning(&self) -> Result<BackendTuning, EngineError>;

    fn set_tuning(&self, tuning: &BackendTuning) -> Result<(), EngineError>;
}
