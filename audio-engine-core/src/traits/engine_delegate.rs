use crate::mixing::object::FinishedPlaying;
use crate::models::buffer::SampleBuffer;
use crate::models::device::{AudioDevice, DeviceRole};
use crate::models::error::EngineError;

/// Observer for engine events.
///
/// Methods are called from engine threads (watchdog, render, capture) and
/// must return quickly. Every argument is a snapshot owned by the caller.
/// All methods default to doing nothing.
pub trait EngineDelegate: Send + Sync {
    fn on_device_added(&self, _device: &AudioDevice) {}

    fn on_device_removed(&self, _device: &AudioDevice) {}

    /// The system default for `role` changed; `None` when no default remains.
    fn on_default_device_changed(&self, _role: DeviceRole, _device: Option<&AudioDevice>) {}

    /// A chunk of captured audio in the capture format.
    fn on_capture(&self, _buffer: &SampleBuffer) {}

    fn on_object_finished(&self, _event: &FinishedPlaying) {}

    /// A failure on an engine-owned thread, where there is no caller to return it to.
    fn on_error(&self, _error: &EngineError) {}
}
