//! The engine facade and the threads it owns.
//!
//! ```text
//! caller threads ──► Engine ──► ObjectRegistry ◄── render thread ──► backend
//!                      │                          capture thread ◄── backend
//!                      └──────► device watchdog ──► initialize_stream (fail-over)
//! ```

pub mod events;
mod streams;
pub mod watchdog;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::mixing::object::AudioObject;
use crate::mixing::playlist::{AudioPlaylist, TrackLoader};
use crate::mixing::producers::MatchFormatProducer;
use crate::mixing::registry::ObjectRegistry;
use crate::models::buffer::SampleBuffer;
use crate::models::config::EngineConfig;
use crate::models::device::{find_default, AudioDevice, DeviceRole};
use crate::models::diagnostics::{DiagnosticsCounters, EngineDiagnostics};
use crate::models::error::EngineError;
use crate::models::format::AudioFormat;
use crate::models::object_id::ObjectId;
use crate::models::state::StreamState;
use crate::processing::convert;
use crate::storage::file_writer::{self, SavedFile};
use crate::storage::wav_codec::WavCodec;
use crate::traits::backend::{AudioBackend, BackendTuning, OpenedStream};
use crate::traits::codec::{AudioCodec, DecodedAudio};
use crate::traits::engine_delegate::EngineDelegate;

use events::{DelegateList, SubscriptionId};
use streams::{StreamControl, StreamKind};

/// State shared between the facade and the engine threads.
pub(crate) struct EngineShared {
    pub(crate) backend: Arc<dyn AudioBackend>,
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<ObjectRegistry>,
    pub(crate) delegates: DelegateList,
    pub(crate) diagnostics: DiagnosticsCounters,
    /// Last successful enumeration. Never held together with the registry lock.
    pub(crate) devices: Mutex<Vec<AudioDevice>>,
    pub(crate) render: StreamControl,
    pub(crate) capture: StreamControl,
    pub(crate) capture_paused: AtomicBool,
    disposing: AtomicBool,
    master_volume: AtomicU32,
    enumeration_period_ms: AtomicU64,
    codecs: RwLock<Vec<Arc<dyn AudioCodec>>>,
}

impl EngineShared {
    pub(crate) fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::SeqCst)
    }

    pub(crate) fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::Relaxed))
    }

    pub(crate) fn enumeration_period(&self) -> Duration {
        Duration::from_millis(self.enumeration_period_ms.load(Ordering::Relaxed))
    }

    fn codec_for(&self, path: &Path) -> Result<Arc<dyn AudioCodec>, EngineError> {
        self.codecs
            .read()
            .iter()
            .rev()
            .find(|codec| codec.supports(path))
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedFormat(format!("no codec for {}", path.display())))
    }

    fn decode_file(&self, path: &Path) -> Result<DecodedAudio, EngineError> {
        self.codec_for(path)?.decode_file(path)
    }

    /// Decode `path` into an object that converts to the render format while playing.
    fn file_track(&self, path: &Path) -> Result<AudioObject, EngineError> {
        let decoded = self.decode_file(path)?;
        log::debug!("Decoded {} ({:?})", path.display(), decoded.source_format);
        let mut object = file_object(path, decoded.buffer);
        object.set_producer(Box::new(MatchFormatProducer::new()));
        Ok(object)
    }
}

impl TrackLoader for EngineShared {
    fn load_track(&self, path: &Path) -> Result<AudioObject, EngineError> {
        self.file_track(path)
    }
}

/// Real-time audio engine.
///
/// Owns the audio objects, the render and capture streams of one
/// [`AudioBackend`], and a watchdog thread that follows device hot-plugs.
/// Dropping the engine shuts it down: the watchdog is joined first so it
/// cannot reopen a stream, then the render and capture threads, then the
/// backend streams are closed.
pub struct Engine {
    shared: Arc<EngineShared>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start an engine on `backend`. Fails if the configuration is invalid or
    /// the backend cannot enumerate devices.
    pub fn new(backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let devices = backend.enumerate_devices()?;
        log::info!(
            "Starting audio engine on {} backend ({} devices)",
            backend.name(),
            devices.len()
        );

        let shared = Arc::new(EngineShared {
            backend,
            registry: Arc::new(ObjectRegistry::new()),
            delegates: DelegateList::new(),
            diagnostics: DiagnosticsCounters::new(),
            devices: Mutex::new(devices),
            render: StreamControl::new(),
            capture: StreamControl::new(),
            capture_paused: AtomicBool::new(false),
            disposing: AtomicBool::new(false),
            master_volume: AtomicU32::new(1.0f32.to_bits()),
            enumeration_period_ms: AtomicU64::new(config.device_enumeration_period_ms),
            codecs: RwLock::new(vec![Arc::new(WavCodec) as Arc<dyn AudioCodec>]),
            config,
        });

        let watchdog_shared = Arc::clone(&shared);
        let watchdog = thread::Builder::new()
            .name("audio-device-watch".into())
            .spawn(move || watchdog::watchdog_loop(watchdog_shared))
            .map_err(|e| EngineError::ResourceExhausted(format!("failed to spawn watchdog thread: {}", e)))?;

        Ok(Self {
            shared,
            watchdog: Mutex::new(Some(watchdog)),
        })
    }

    pub fn with_defaults(backend: Arc<dyn AudioBackend>) -> Result<Self, EngineError> {
        Self::new(backend, EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn backend_name(&self) -> &str {
        self.shared.backend.name()
    }

    /// Open the render stream and start mixing.
    ///
    /// `None` selects the system default device and the configured default
    /// format. A running render stream is stopped first. Returns the device
    /// and format the backend actually opened.
    pub fn initialize_render(
        &self,
        device: Option<&AudioDevice>,
        format: Option<AudioFormat>,
    ) -> Result<OpenedStream, EngineError> {
        self.shared.initialize_stream(StreamKind::Render, device, format)
    }

    /// Stop the render thread and close the stream. Safe to call repeatedly.
    pub fn stop_rendering(&self) -> Result<(), EngineError> {
        self.shared.stop_stream(StreamKind::Render)
    }

    pub fn initialize_capture(
        &self,
        device: Option<&AudioDevice>,
        format: Option<AudioFormat>,
    ) -> Result<OpenedStream, EngineError> {
        self.shared.initialize_stream(StreamKind::Capture, device, format)
    }

    pub fn stop_capturing(&self) -> Result<(), EngineError> {
        self.shared.stop_stream(StreamKind::Capture)
    }

    /// Stop delivering captured audio without closing the stream.
    pub fn pause_capture(&self) {
        self.shared.capture_paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_capture(&self) {
        self.shared.capture_paused.store(false, Ordering::SeqCst);
    }

    pub fn is_capture_paused(&self) -> bool {
        self.shared.capture_paused.load(Ordering::SeqCst)
    }

    /// Whether the render thread is running. Turns false when the stream
    /// fails on its own thread.
    pub fn is_render_initialized(&self) -> bool {
        self.shared.render.is_initialized()
    }

    pub fn is_capture_initialized(&self) -> bool {
        self.shared.capture.is_initialized()
    }

    pub fn render_state(&self) -> StreamState {
        self.stream_state(StreamKind::Render)
    }

    pub fn capture_state(&self) -> StreamState {
        self.stream_state(StreamKind::Capture)
    }

    fn stream_state(&self, kind: StreamKind) -> StreamState {
        let control = self.shared.stream(kind);
        let state = control.slot.lock().state;
        if state.is_active() && !control.is_initialized() {
            StreamState::Stopped
        } else {
            state
        }
    }

    /// Device the render stream is bound to.
    pub fn render_device(&self) -> Option<AudioDevice> {
        self.shared.render.slot.lock().device.clone()
    }

    pub fn capture_device(&self) -> Option<AudioDevice> {
        self.shared.capture.slot.lock().device.clone()
    }

    /// Negotiated render format while the stream is open.
    pub fn render_format(&self) -> Option<AudioFormat> {
        let slot = self.shared.render.slot.lock();
        slot.format.filter(|_| slot.open)
    }

    pub fn capture_format(&self) -> Option<AudioFormat> {
        let slot = self.shared.capture.slot.lock();
        slot.format.filter(|_| slot.open)
    }

    pub fn master_volume(&self) -> f32 {
        self.shared.master_volume()
    }

    /// Software gain applied to the whole mix. Values above `1.0` may clip.
    pub fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(EngineError::Configuration(format!("invalid master volume {}", volume)));
        }
        self.shared.master_volume.store(volume.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Device-level gain, forwarded to the backend.
    pub fn output_gain(&self) -> Result<f32, EngineError> {
        self.shared.backend.output_gain()
    }

    pub fn set_output_gain(&self, gain: f32) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(EngineError::Configuration(format!("output gain {} is outside [0, 1]", gain)));
        }
        self.shared.backend.set_output_gain(gain)
    }

    pub fn backend_tuning(&self) -> Result<BackendTuning, EngineError> {
        self.shared.backend.tuning()
    }

    pub fn set_backend_tuning(&self, tuning: &BackendTuning) -> Result<(), EngineError> {
        self.shared.backend.set_tuning(tuning)
    }

    /// Devices from the watchdog's last poll, optionally filtered by role.
    pub fn devices(&self, role: Option<DeviceRole>) -> Vec<AudioDevice> {
        let devices = self.shared.devices.lock();
        devices
            .iter()
            .filter(|d| role.map_or(true, |role| d.role.supports(role)))
            .cloned()
            .collect()
    }

    /// Ask the backend for the current device list right now.
    pub fn enumerate_devices(&self) -> Result<Vec<AudioDevice>, EngineError> {
        self.shared.backend.enumerate_devices()
    }

    pub fn device_by_id(&self, id: &str) -> Option<AudioDevice> {
        self.shared.devices.lock().iter().find(|d| d.id == id).cloned()
    }

    /// System default device for `role`, which must be render or capture.
    pub fn default_device(&self, role: DeviceRole) -> Result<Option<AudioDevice>, EngineError> {
        if role == DeviceRole::Duplex {
            return Err(EngineError::Configuration(
                "default device role must be render or capture".into(),
            ));
        }
        let devices = self.shared.devices.lock();
        Ok(find_default(&devices, role).cloned())
    }

    pub fn device_enumeration_period(&self) -> Duration {
        self.shared.enumeration_period()
    }

    pub fn set_device_enumeration_period(&self, period_ms: u64) -> Result<(), EngineError> {
        if period_ms == 0 {
            return Err(EngineError::Configuration(
                "device enumeration period must be positive".into(),
            ));
        }
        self.shared.enumeration_period_ms.store(period_ms, Ordering::Relaxed);
        Ok(())
    }

    pub fn subscribe(&self, delegate: Arc<dyn EngineDelegate>) -> SubscriptionId {
        self.shared.delegates.subscribe(delegate)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.delegates.unsubscribe(id)
    }

    /// The registry, for direct access from object callbacks and tests.
    pub fn objects(&self) -> &ObjectRegistry {
        &self.shared.registry
    }

    /// An empty, stopped playlist whose tracks are decoded with the engine's codecs.
    pub fn create_playlist(&self) -> AudioPlaylist {
        AudioPlaylist::new(
            Arc::clone(&self.shared.registry),
            Arc::clone(&self.shared) as Arc<dyn TrackLoader>,
        )
    }

    pub fn create_object(&self, object: AudioObject) -> ObjectId {
        self.shared.registry.insert(object)
    }

    pub fn destroy_object(&self, id: ObjectId) -> bool {
        self.shared.registry.destroy(id)
    }

    pub fn object_exists(&self, id: ObjectId) -> bool {
        self.shared.registry.contains(id)
    }

    pub fn object_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn object_id_at(&self, index: usize) -> Option<ObjectId> {
        self.shared.registry.id_at(index)
    }

    pub fn find_object(&self, name: &str) -> Option<ObjectId> {
        self.shared.registry.find_by_name(name)
    }

    pub fn with_object<R>(&self, id: ObjectId, f: impl FnOnce(&mut AudioObject) -> R) -> Result<R, EngineError> {
        self.shared.registry.with_object(id, f)
    }

    pub fn set_paused(&self, id: ObjectId, paused: bool) -> Result<(), EngineError> {
        self.with_object(id, |o| o.is_paused = paused)
    }

    pub fn set_volume(&self, id: ObjectId, volume: f32) -> Result<(), EngineError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(EngineError::Configuration(format!("invalid volume {}", volume)));
        }
        self.with_object(id, |o| o.volume = volume)
    }

    pub fn set_play_count(&self, id: ObjectId, play_count: u32) -> Result<(), EngineError> {
        self.with_object(id, |o| o.play_count = play_count)
    }

    pub fn set_persistent(&self, id: ObjectId, persistent: bool) -> Result<(), EngineError> {
        self.with_object(id, |o| o.is_persistent = persistent)
    }

    pub fn position(&self, id: ObjectId) -> Result<f64, EngineError> {
        self.with_object(id, |o| o.position())
    }

    pub fn set_position(&self, id: ObjectId, position: f64) -> Result<(), EngineError> {
        self.with_object(id, |o| o.set_position(position))?
    }

    pub fn register_category(&self, name: &str, volume: f32) -> Result<(), EngineError> {
        self.shared.registry.register_category(name, volume)
    }

    pub fn unregister_category(&self, name: &str) -> bool {
        self.shared.registry.unregister_category(name)
    }

    pub fn set_category_volume(&self, name: &str, volume: f32) -> Result<(), EngineError> {
        self.shared.registry.set_category_volume(name, volume)
    }

    pub fn category_volume(&self, name: &str) -> Option<f32> {
        self.shared.registry.category_volume(name)
    }

    /// Add a codec. Later registrations take precedence for shared extensions.
    pub fn register_codec(&self, codec: Arc<dyn AudioCodec>) {
        self.shared.codecs.write().push(codec);
    }

    pub fn decode_file(&self, path: &Path) -> Result<DecodedAudio, EngineError> {
        self.shared.decode_file(path)
    }

    /// Decode a file and start playing it.
    ///
    /// The object converts its source to the render format while playing.
    pub fn play(&self, path: &Path, play_count: u32, paused: bool) -> Result<ObjectId, EngineError> {
        let object = self
            .shared
            .file_track(path)?
            .with_play_count(play_count)
            .paused(paused);
        log::debug!("Playing {}", path.display());
        Ok(self.create_object(object))
    }

    /// Decode a file into a paused object.
    ///
    /// With an open render stream the samples are converted to the render
    /// layout and rate here, so playback needs no conversion.
    pub fn load(&self, path: &Path, play_count: u32) -> Result<ObjectId, EngineError> {
        let decoded = self.decode_file(path)?;
        let mut object = match self.render_format() {
            Some(format) => {
                let buffer = convert::convert(&decoded.buffer, format.channel_layout, format.sample_rate)?;
                file_object(path, buffer)
            }
            None => {
                let mut object = file_object(path, decoded.buffer);
                object.set_producer(Box::new(MatchFormatProducer::new()));
                object
            }
        };
        object.play_count = play_count;
        object.is_paused = true;
        Ok(self.create_object(object))
    }

    /// Encode `buffer` into `target_format` with the codec matching `path`'s
    /// extension and write it out.
    pub fn save_to_file(
        &self,
        buffer: &SampleBuffer,
        path: &Path,
        target_format: &AudioFormat,
        overwrite: bool,
    ) -> Result<SavedFile, EngineError> {
        let codec = self.shared.codec_for(path)?;
        let bytes = codec.encode(buffer, target_format)?;
        file_writer::write_file(path, &bytes, overwrite)
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        self.shared.diagnostics.snapshot()
    }

    pub fn is_disposing(&self) -> bool {
        self.shared.is_disposing()
    }

    /// Stop every thread and close the streams. Also run on drop.
    pub fn shutdown(&self) {
        if self.shared.disposing.swap(true, Ordering::SeqCst) {
            return;
        }
        let started_at = self.shared.diagnostics.snapshot().started_at;

        if let Some(handle) = self.watchdog.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("Device watchdog panicked");
            }
        }

        let shared = &self.shared;
        drop(shared.quiesce(StreamKind::Render));
        drop(shared.quiesce(StreamKind::Capture));
        for kind in [StreamKind::Render, StreamKind::Capture] {
            let mut slot = shared.stream(kind).slot.lock();
            if let Err(e) = shared.close_locked(kind, &mut slot) {
                log::warn!("Closing {} stream during shutdown failed: {}", kind, e);
            }
        }

        let uptime = chrono::Utc::now() - started_at;
        log::info!(
            "Audio engine shut down after {:.1}s",
            uptime.num_milliseconds() as f64 / 1000.0
        );
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn file_object(path: &Path, buffer: SampleBuffer) -> AudioObject {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    AudioObject::new(name, buffer).with_file_path(path)
}
