use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use audio_engine_core::{
    AudioBackend, AudioDevice, AudioFormat, BackendTuning, DeviceRole, EngineError, OpenedStream,
    SampleBuffer,
};
use parking_lot::Mutex;

use crate::device_registry::{DeviceRegistry, VirtualDevice};
use crate::error::VirtualDeviceError;
use crate::signal::{CaptureSignal, SignalGenerator};

/// Default device period.
const DEFAULT_PERIOD: Duration = Duration::from_millis(10);

/// Default rendered-history cap: ten seconds at 48 kHz.
const DEFAULT_HISTORY_FRAMES: usize = 480_000;

/// Backend calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    Enumerate,
    OpenRender,
    OpenCapture,
    WaitRender,
    WriteRender,
    ReadCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Render,
    Capture,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Capture => "capture",
        }
    }
}

struct OpenStream {
    device: AudioDevice,
    format: AudioFormat,
    next_due: Instant,
}

struct BackendState {
    devices: DeviceRegistry,
    render: Option<OpenStream>,
    capture: Option<OpenStream>,
    signal: SignalGenerator,
    /// Interleaved samples written to the render stream, after output gain.
    rendered: Vec<f32>,
    rendered_format: Option<AudioFormat>,
    render_writes: u64,
    output_gain: f32,
    tuning: BackendTuning,
    injected: HashMap<BackendOperation, EngineError>,
}

impl BackendState {
    fn take_injected(&mut self, operation: BackendOperation) -> Result<(), EngineError> {
        match self.injected.remove(&operation) {
            Some(e) => {
                log::warn!("Injected failure for {:?}: {}", operation, e);
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn stream(&self, direction: Direction) -> Option<&OpenStream> {
        match direction {
            Direction::Render => self.render.as_ref(),
            Direction::Capture => self.capture.as_ref(),
        }
    }

    fn stream_mut(&mut self, direction: Direction) -> &mut Option<OpenStream> {
        match direction {
            Direction::Render => &mut self.render,
            Direction::Capture => &mut self.capture,
        }
    }

    /// The open stream, as long as its device is still plugged in.
    fn live(&self, direction: Direction) -> Result<&OpenStream, VirtualDeviceError> {
        let stream = self
            .stream(direction)
            .ok_or(VirtualDeviceError::NotOpen(direction.name()))?;
        if !self.devices.contains(&stream.device.id) {
            return Err(VirtualDeviceError::NotPresent(stream.device.id.clone()));
        }
        Ok(stream)
    }
}

/// An [`AudioBackend`] over simulated devices.
///
/// Streams are paced by the wall clock: every period the render stream asks
/// for one period of frames and the capture stream delivers one. Devices can
/// be plugged and unplugged at any time; a stream whose device disappears
/// fails on its next wait, read or write, like a native endpoint would.
///
/// Rendered audio is kept (up to a cap) so callers can inspect what the
/// engine produced.
pub struct VirtualBackend {
    name: String,
    period: Duration,
    history_frames: usize,
    state: Mutex<BackendState>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self {
            name: "virtual".into(),
            period: DEFAULT_PERIOD,
            history_frames: DEFAULT_HISTORY_FRAMES,
            state: Mutex::new(BackendState {
                devices: DeviceRegistry::new(),
                render: None,
                capture: None,
                signal: SignalGenerator::default(),
                rendered: Vec::new(),
                rendered_format: None,
                render_writes: 0,
                output_gain: 1.0,
                tuning: BackendTuning::new(),
                injected: HashMap::new(),
            }),
        }
    }

    /// A backend with one default speaker ("speakers") and one default microphone ("mic").
    pub fn with_default_devices() -> Self {
        let mut backend = Self::new();
        let devices = &mut backend.state.get_mut().devices;
        for device in [
            VirtualDevice::new("speakers", "Speakers", DeviceRole::Render),
            VirtualDevice::new("mic", "Microphone", DeviceRole::Capture),
        ] {
            if let Err(e) = devices.plug(device) {
                log::warn!("Failed to plug default virtual device: {}", e);
            }
        }
        backend
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    /// Cap on retained rendered frames; older frames are dropped first.
    pub fn with_history_frames(mut self, frames: usize) -> Self {
        self.history_frames = frames;
        self
    }

    pub fn with_capture_signal(mut self, signal: CaptureSignal) -> Self {
        self.state.get_mut().signal.set_signal(signal);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn plug(&self, device: impl Into<VirtualDevice>) -> Result<(), VirtualDeviceError> {
        self.state.lock().devices.plug(device.into())
    }

    pub fn unplug(&self, id: &str) -> Result<AudioDevice, VirtualDeviceError> {
        self.state.lock().devices.unplug(id).map(|d| d.info)
    }

    pub fn set_default_device(&self, role: DeviceRole, id: &str) -> Result<(), VirtualDeviceError> {
        self.state.lock().devices.set_default(role, id)
    }

    pub fn set_capture_signal(&self, signal: CaptureSignal) {
        self.state.lock().signal.set_signal(signal);
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: BackendOperation, error: EngineError) {
        self.state.lock().injected.insert(operation, error);
    }

    pub fn is_render_open(&self) -> bool {
        self.state.lock().render.is_some()
    }

    pub fn is_capture_open(&self) -> bool {
        self.state.lock().capture.is_some()
    }

    pub fn render_device(&self) -> Option<AudioDevice> {
        self.state.lock().render.as_ref().map(|s| s.device.clone())
    }

    pub fn capture_device(&self) -> Option<AudioDevice> {
        self.state.lock().capture.as_ref().map(|s| s.device.clone())
    }

    /// Retained rendered audio as one buffer in the last written format.
    pub fn rendered(&self) -> Result<SampleBuffer, EngineError> {
        let state = self.state.lock();
        match state.rendered_format {
            Some(format) => SampleBuffer::from_samples(
                state.rendered.clone(),
                format.channel_layout,
                format.sample_rate,
            ),
            None => Ok(SampleBuffer::default()),
        }
    }

    pub fn rendered_frames(&self) -> usize {
        let state = self.state.lock();
        match state.rendered_format {
            Some(format) if format.channel_count() > 0 => {
                state.rendered.len() / format.channel_count() as usize
            }
            _ => 0,
        }
    }

    /// Number of chunks accepted by `write_render` since creation.
    pub fn render_writes(&self) -> u64 {
        self.state.lock().render_writes
    }

    pub fn clear_rendered(&self) {
        self.state.lock().rendered.clear();
    }

    fn frames_per_period(&self, sample_rate: u32) -> usize {
        let frames = sample_rate as u128 * self.period.as_micros() / 1_000_000;
        (frames as usize).max(1)
    }

    fn open(
        &self,
        direction: Direction,
        requested: Option<&AudioDevice>,
        format: &AudioFormat,
    ) -> Result<OpenedStream, EngineError> {
        let mut state = self.state.lock();
        state.take_injected(match direction {
            Direction::Render => BackendOperation::OpenRender,
            Direction::Capture => BackendOperation::OpenCapture,
        })?;
        format.validate()?;

        let role = match direction {
            Direction::Render => DeviceRole::Render,
            Direction::Capture => DeviceRole::Capture,
        };
        let device = state.devices.resolve(requested, role)?;
        let sample_rate = device.native_rate.unwrap_or(format.sample_rate);
        let negotiated = AudioFormat::new(
            format.encoding,
            format.bits_per_sample,
            format.channel_layout,
            sample_rate,
        );
        let info = device.info.clone();

        *state.stream_mut(direction) = Some(OpenStream {
            device: info.clone(),
            format: negotiated,
            next_due: Instant::now(),
        });
        log::info!(
            "Virtual {} stream opened on '{}' ({} ch, {} Hz)",
            direction.name(),
            info.name,
            negotiated.channel_count(),
            negotiated.sample_rate
        );
        Ok(OpenedStream {
            device: info,
            format: negotiated,
        })
    }

    fn close(&self, direction: Direction) {
        if let Some(stream) = self.state.lock().stream_mut(direction).take() {
            log::info!("Virtual {} stream on '{}' closed", direction.name(), stream.device.name);
        }
    }

    /// Block until the stream's next period is due, up to `timeout`.
    ///
    /// Returns the format of a due stream, or `None` when the wait timed out
    /// or the stream was closed meanwhile.
    fn wait_period(
        &self,
        direction: Direction,
        operation: BackendOperation,
        timeout: Duration,
    ) -> Result<Option<AudioFormat>, EngineError> {
        let wait = {
            let mut state = self.state.lock();
            state.take_injected(operation)?;
            let stream = state.live(direction)?;
            stream.next_due.saturating_duration_since(Instant::now())
        };
        if wait > timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        thread::sleep(wait);

        let mut state = self.state.lock();
        match state.stream_mut(direction).as_mut() {
            Some(stream) => {
                stream.next_due = Instant::now() + self.period;
                Ok(Some(stream.format))
            }
            None => Ok(None),
        }
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate_devices(&self) -> Result<Vec<AudioDevice>, EngineError> {
        let mut state = self.state.lock();
        state.take_injected(BackendOperation::Enumerate)?;
        Ok(state.devices.enumerate())
    }

    fn open_render(
        &self,
        device: Option<&AudioDevice>,
        format: &AudioFormat,
    ) -> Result<OpenedStream, EngineError> {
        self.open(Direction::Render, device, format)
    }

    fn close_render(&self) -> Result<(), EngineError> {
        self.close(Direction::Render);
        Ok(())
    }

    fn render_frames_ready(&self, timeout: Duration) -> Result<usize, EngineError> {
        let format = self.wait_period(Direction::Render, BackendOperation::WaitRender, timeout)?;
        Ok(format.map_or(0, |f| self.frames_per_period(f.sample_rate)))
    }

    fn write_render(&self, buffer: &SampleBuffer) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.take_injected(BackendOperation::WriteRender)?;
        let format = state.live(Direction::Render)?.format;
        if buffer.channel_layout() != format.channel_layout || buffer.sample_rate() != format.sample_rate {
            return Err(VirtualDeviceError::FormatMismatch {
                channels: buffer.channel_layout().count,
                sample_rate: buffer.sample_rate(),
            }
            .into());
        }

        if state.rendered_format != Some(format) {
            state.rendered.clear();
            state.rendered_format = Some(format);
        }
        let gain = state.output_gain;
        state.rendered.extend(buffer.samples().iter().map(|s| s * gain));
        let limit = self.history_frames.saturating_mul(format.channel_count() as usize);
        if state.rendered.len() > limit {
            let excess = state.rendered.len() - limit;
            state.rendered.drain(..excess);
        }
        state.render_writes += 1;
        Ok(())
    }

    fn open_capture(
        &self,
        device: Option<&AudioDevice>,
        format: &AudioFormat,
    ) -> Result<OpenedStream, EngineError> {
        self.open(Direction::Capture, device, format)
    }

    fn close_capture(&self) -> Result<(), EngineError> {
        self.close(Direction::Capture);
        Ok(())
    }

    fn read_capture(&self, timeout: Duration) -> Result<Option<SampleBuffer>, EngineError> {
        let format = match self.wait_period(Direction::Capture, BackendOperation::ReadCapture, timeout)? {
            Some(format) => format,
            None => return Ok(None),
        };
        let frames = self.frames_per_period(format.sample_rate);
        let chunk = self
            .state
            .lock()
            .signal
            .next_chunk(frames, format.channel_layout, format.sample_rate)?;
        Ok(Some(chunk))
    }

    fn output_gain(&self) -> Result<f32, EngineError> {
        Ok(self.state.lock().output_gain)
    }

    fn set_output_gain(&self, gain: f32) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(EngineError::Configuration(format!(
                "output gain {} is outside [0, 1]",
                gain
            )));
        }
        self.state.lock().output_gain = gain;
        Ok(())
    }

    fn tuning(&self) -> Result<BackendTuning, EngineError> {
        Ok(self.state.lock().tuning.clone())
    }

    fn set_tuning(&self, tuning: &BackendTuning) -> Result<(), EngineError> {
        self.state.lock().tuning.merge(tuning);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_engine_core::ChannelLayout;

    fn backend() -> VirtualBackend {
        VirtualBackend::with_default_devices().with_period(Duration::from_millis(2))
    }

    fn stereo() -> AudioFormat {
        AudioFormat::internal(ChannelLayout::STEREO, 48000)
    }

    #[test]
    fn open_without_device_uses_default() {
        let backend = backend();
        let opened = backend.open_render(None, &stereo()).unwrap();
        assert_eq!(opened.device.id, "speakers");
        assert_eq!(opened.format, stereo());
        assert!(backend.is_render_open());

        backend.close_render().unwrap();
        backend.close_render().unwrap();
        assert!(!backend.is_render_open());
    }

    #[test]
    fn open_missing_device_is_device_error() {
        let backend = backend();
        let ghost = AudioDevice::new("ghost", "Ghost", DeviceRole::Render);
        let err = backend.open_render(Some(&ghost), &stereo()).unwrap_err();
        assert!(err.is_device_error());
        assert!(!backend.is_render_open());
    }

    #[test]
    fn native_rate_overrides_request() {
        let backend = backend();
        backend
            .plug(VirtualDevice::new("dac", "DAC", DeviceRole::Render).with_native_rate(44100))
            .unwrap();
        let dac = AudioDevice::new("dac", "DAC", DeviceRole::Render);
        let opened = backend.open_render(Some(&dac), &stereo()).unwrap();
        assert_eq!(opened.format.sample_rate, 44100);
        assert_eq!(opened.format.channel_layout, ChannelLayout::STEREO);
    }

    #[test]
    fn render_wait_returns_one_period() {
        let backend = backend();
        backend.open_render(None, &stereo()).unwrap();
        let frames = backend.render_frames_ready(Duration::from_millis(100)).unwrap();
        assert_eq!(frames, 96);
    }

    #[test]
    fn unplugging_bound_device_fails_stream() {
        let backend = backend();
        backend.open_render(None, &stereo()).unwrap();
        backend.unplug("speakers").unwrap();
        let err = backend.render_frames_ready(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, EngineError::Device { code: -19, .. }));
    }

    #[test]
    fn write_records_history_with_output_gain() {
        let backend = backend();
        backend.open_render(None, &stereo()).unwrap();
        backend.set_output_gain(0.5).unwrap();
        let chunk = SampleBuffer::filled(10, ChannelLayout::STEREO, 48000, 0.8).unwrap();
        backend.write_render(&chunk).unwrap();

        let rendered = backend.rendered().unwrap();
        assert_eq!(rendered.frame_count(), 10);
        assert!(rendered.samples().iter().all(|s| (s - 0.4).abs() < 1e-6));
        assert_eq!(backend.render_writes(), 1);
    }

    #[test]
    fn history_is_capped() {
        let backend = backend().with_history_frames(15);
        backend.open_render(None, &stereo()).unwrap();
        let chunk = SampleBuffer::filled(10, ChannelLayout::STEREO, 48000, 0.1).unwrap();
        backend.write_render(&chunk).unwrap();
        backend.write_render(&chunk).unwrap();
        assert_eq!(backend.rendered_frames(), 15);
    }

    #[test]
    fn write_rejects_mismatched_chunk() {
        let backend = backend();
        backend.open_render(None, &stereo()).unwrap();
        let mono = SampleBuffer::filled(10, ChannelLayout::MONO, 48000, 0.1).unwrap();
        let err = backend.write_render(&mono).unwrap_err();
        assert!(matches!(err, EngineError::Device { code: -22, .. }));
        assert_eq!(backend.rendered_frames(), 0);
    }

    #[test]
    fn write_without_open_stream_fails() {
        let backend = backend();
        let chunk = SampleBuffer::filled(4, ChannelLayout::STEREO, 48000, 0.1).unwrap();
        assert!(backend.write_render(&chunk).is_err());
    }

    #[test]
    fn injected_failure_fires_once() {
        let backend = backend();
        backend.fail_next(
            BackendOperation::Enumerate,
            EngineError::device(-5, "VirtualAudio", "bus reset"),
        );
        assert!(backend.enumerate_devices().is_err());
        assert_eq!(backend.enumerate_devices().unwrap().len(), 2);
    }

    #[test]
    fn capture_delivers_signal() {
        let backend = backend().with_capture_signal(CaptureSignal::Constant(0.3));
        let mono = AudioFormat::internal(ChannelLayout::MONO, 16000);
        backend.open_capture(None, &mono).unwrap();
        let chunk = backend
            .read_capture(Duration::from_millis(100))
            .unwrap()
            .expect("a chunk within one period");
        assert_eq!(chunk.frame_count(), 32);
        assert_eq!(chunk.channel_layout(), ChannelLayout::MONO);
        assert!(chunk.samples().iter().all(|s| (s - 0.3).abs() < 1e-6));
    }

    #[test]
    fn output_gain_is_range_checked() {
        let backend = backend();
        assert!(backend.set_output_gain(1.5).is_err());
        assert!(backend.set_output_gain(-0.1).is_err());
        assert!((backend.output_gain().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tuning_merges() {
        let backend = backend();
        let mut first = BackendTuning::new();
        first.set("buffer_ms", 20);
        backend.set_tuning(&first).unwrap();
        let mut second = BackendTuning::new();
        second.set("exclusive", true);
        backend.set_tuning(&second).unwrap();

        let tuning = backend.tuning().unwrap();
        assert_eq!(tuning.entries().len(), 2);
        assert_eq!(tuning.get("buffer_ms").and_then(|v| v.as_i64()), Some(20));
    }
}
