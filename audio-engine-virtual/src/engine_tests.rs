//! Engine behaviour against the virtual backend: mixing, stream lifecycle,
//! hot-plug notification and fail-over.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use audio_engine_core::{
    AudioBackend, AudioDevice, AudioFormat, AudioObject, BackendTuning, ChannelLayout, DeviceRole,
    Engine, EngineConfig, EngineDelegate, EngineError, FinishedPlaying, SampleBuffer,
    SampleEncoding, StreamState,
};
use parking_lot::Mutex;

use crate::backend::{BackendOperation, VirtualBackend};
use crate::device_registry::VirtualDevice;
use crate::signal::CaptureSignal;

const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    errors: Mutex<Vec<EngineError>>,
    finished: Mutex<Vec<FinishedPlaying>>,
    captured: AtomicUsize,
    last_capture: Mutex<Option<f32>>,
}

impl Recorder {
    fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == event).count()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e.as_str() == event)
    }

    fn error_count(&self) -> usize {
        self.errors.lock().len()
    }
}

impl EngineDelegate for Recorder {
    fn on_device_added(&self, device: &AudioDevice) {
        self.events.lock().push(format!("added:{}", device.id));
    }

    fn on_device_removed(&self, device: &AudioDevice) {
        self.events.lock().push(format!("removed:{}", device.id));
    }

    fn on_default_device_changed(&self, role: DeviceRole, device: Option<&AudioDevice>) {
        let id = device.map(|d| d.id.as_str()).unwrap_or("none");
        self.events.lock().push(format!("default:{:?}:{}", role, id));
    }

    fn on_capture(&self, buffer: &SampleBuffer) {
        self.captured.fetch_add(1, Ordering::SeqCst);
        *self.last_capture.lock() = buffer.samples().first().copied();
    }

    fn on_object_finished(&self, event: &FinishedPlaying) {
        self.finished.lock().push(event.clone());
    }

    fn on_error(&self, error: &EngineError) {
        self.errors.lock().push(error.clone());
    }
}

/// Sleeps, then queries the engine, whenever the render thread reports an error.
#[derive(Default)]
struct QueryOnRenderError {
    engine: Mutex<Weak<Engine>>,
    entered: AtomicUsize,
    returned: AtomicUsize,
    seen_device: Mutex<Option<Option<AudioDevice>>>,
}

impl EngineDelegate for QueryOnRenderError {
    fn on_error(&self, _error: &EngineError) {
        if thread::current().name() != Some("audio-render") {
            return;
        }
        self.entered.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        let engine = self.engine.lock().upgrade();
        if let Some(engine) = engine {
            *self.seen_device.lock() = Some(engine.render_device());
            let _ = engine.render_state();
            let _ = engine.render_format();
        }
        self.returned.fetch_add(1, Ordering::SeqCst);
    }
}

fn start_querying(backend: &Arc<VirtualBackend>) -> (Arc<Engine>, Arc<QueryOnRenderError>) {
    let engine = Arc::new(Engine::new(backend.clone(), config()).unwrap());
    let delegate = Arc::new(QueryOnRenderError::default());
    *delegate.engine.lock() = Arc::downgrade(&engine);
    engine.subscribe(delegate.clone());
    (engine, delegate)
}

fn config() -> EngineConfig {
    EngineConfig {
        device_enumeration_period_ms: 10,
        stream_timeout_ms: 50,
        ..EngineConfig::default()
    }
}

fn backend() -> Arc<VirtualBackend> {
    Arc::new(VirtualBackend::with_default_devices().with_period(Duration::from_millis(5)))
}

fn start(backend: &Arc<VirtualBackend>) -> (Engine, Arc<Recorder>) {
    let engine = Engine::new(backend.clone(), config()).unwrap();
    let recorder = Arc::new(Recorder::default());
    engine.subscribe(recorder.clone());
    (engine, recorder)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn temp_file_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("audio_engine_{}_{}.wav", name, std::process::id()))
}

fn looping(name: &str, value: f32) -> AudioObject {
    let buffer = SampleBuffer::filled(480, ChannelLayout::STEREO, 48000, value).unwrap();
    AudioObject::new(name, buffer).with_play_count(0)
}

#[test]
fn render_mixes_objects_onto_the_device() {
    let backend = backend();
    let (engine, _recorder) = start(&backend);
    engine.create_object(looping("a", 1.0));
    engine.create_object(looping("b", 1.0));
    engine.set_master_volume(0.5).unwrap();

    let opened = engine.initialize_render(None, None).unwrap();
    assert_eq!(opened.device.id, "speakers");
    assert_eq!(engine.render_state(), StreamState::Active);
    assert!(wait_until(|| backend.rendered_frames() >= 960));
    engine.stop_rendering().unwrap();

    let rendered = backend.rendered().unwrap();
    assert_eq!(rendered.channel_layout(), ChannelLayout::STEREO);
    for sample in rendered.samples() {
        assert_abs_diff_eq!(*sample, 0.5, epsilon = 1e-6);
    }
    assert!(engine.diagnostics().render_cycles > 0);
}

#[test]
fn finished_object_is_removed_and_reported() {
    let backend = backend();
    let (engine, recorder) = start(&backend);
    let blip = SampleBuffer::filled(100, ChannelLayout::STEREO, 48000, 0.2).unwrap();
    let id = engine.create_object(AudioObject::new("blip", blip));

    engine.initialize_render(None, None).unwrap();
    assert!(wait_until(|| !recorder.finished.lock().is_empty()));

    let finished = recorder.finished.lock()[0].clone();
    assert_eq!(finished.id, id);
    assert_eq!(finished.name, "blip");
    assert!(finished.removed);
    assert!(!engine.object_exists(id));
}

#[test]
fn stop_rendering_twice_is_a_no_op() {
    let backend = backend();
    let (engine, _recorder) = start(&backend);
    engine.initialize_render(None, None).unwrap();
    engine.stop_rendering().unwrap();
    engine.stop_rendering().unwrap();

    assert!(!engine.is_render_initialized());
    assert_eq!(engine.render_state(), StreamState::Stopped);
    assert!(engine.render_device().is_none());
    assert!(!backend.is_render_open());
}

#[test]
fn reinitialize_replaces_running_stream() {
    let backend = backend();
    backend
        .plug(VirtualDevice::new("hdmi", "HDMI", DeviceRole::Render))
        .unwrap();
    let (engine, _recorder) = start(&backend);
    engine.initialize_render(None, None).unwrap();

    let hdmi = engine.device_by_id("hdmi").unwrap();
    let opened = engine.initialize_render(Some(&hdmi), None).unwrap();
    assert_eq!(opened.device.id, "hdmi");
    assert_eq!(backend.render_device().map(|d| d.id), Some("hdmi".to_string()));
    assert!(engine.is_render_initialized());
}

#[test]
fn open_failure_leaves_stream_stopped() {
    let backend = backend();
    let (engine, _recorder) = start(&backend);
    backend.fail_next(
        BackendOperation::OpenRender,
        EngineError::device(-16, "VirtualAudio", "device busy"),
    );

    let err = engine.initialize_render(None, None).unwrap_err();
    assert!(err.is_device_error());
    assert!(!engine.is_render_initialized());
    assert!(engine.render_format().is_none());
}

#[test]
fn render_failure_stops_stream_and_reports_error() {
    let backend = backend();
    let (engine, recorder) = start(&backend);
    engine.initialize_render(None, None).unwrap();
    backend.fail_next(
        BackendOperation::WriteRender,
        EngineError::device(-5, "VirtualAudio", "write failed"),
    );

    assert!(wait_until(|| !engine.is_render_initialized()));
    assert!(wait_until(|| recorder.error_count() > 0));
    assert_eq!(engine.render_state(), StreamState::Stopped);
    assert!(engine.diagnostics().stream_errors >= 1);

    engine.stop_rendering().unwrap();
    assert!(!backend.is_render_open());
}

#[test]
fn capture_delivers_chunks_until_paused() {
    let backend = Arc::new(
        VirtualBackend::with_default_devices()
            .with_period(Duration::from_millis(5))
            .with_capture_signal(CaptureSignal::Constant(0.25)),
    );
    let (engine, recorder) = start(&backend);
    let mono = AudioFormat::internal(ChannelLayout::MONO, 16000);
    let opened = engine.initialize_capture(None, Some(mono)).unwrap();
    assert_eq!(opened.device.id, "mic");
    assert_eq!(engine.capture_format(), Some(mono));

    assert!(wait_until(|| recorder.captured.load(Ordering::SeqCst) >= 2));
    let last = recorder.last_capture.lock().unwrap_or_default();
    assert_abs_diff_eq!(last, 0.25, epsilon = 1e-6);

    engine.pause_capture();
    assert!(engine.is_capture_paused());
    thread::sleep(Duration::from_millis(30));
    let paused_at = recorder.captured.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(recorder.captured.load(Ordering::SeqCst), paused_at);
    assert!(engine.is_capture_initialized());

    engine.resume_capture();
    assert!(wait_until(|| recorder.captured.load(Ordering::SeqCst) > paused_at));

    engine.stop_capturing().unwrap();
    engine.stop_capturing().unwrap();
    assert!(!backend.is_capture_open());
}

#[test]
fn device_hot_plug_raises_events_once() {
    let backend = backend();
    let (engine, recorder) = start(&backend);

    backend
        .plug(VirtualDevice::new("usb-mic", "USB Mic", DeviceRole::Capture))
        .unwrap();
    assert!(wait_until(|| recorder.count("added:usb-mic") == 1));
    assert!(engine.device_by_id("usb-mic").is_some());

    backend.unplug("usb-mic").unwrap();
    assert!(wait_until(|| recorder.count("removed:usb-mic") == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count("added:usb-mic"), 1);
    assert_eq!(recorder.count("removed:usb-mic"), 1);
    assert!(engine.device_by_id("usb-mic").is_none());
}

#[test]
fn default_change_is_reported() {
    let backend = backend();
    backend
        .plug(VirtualDevice::new("hp", "Headphones", DeviceRole::Render))
        .unwrap();
    let (engine, recorder) = start(&backend);

    backend.set_default_device(DeviceRole::Render, "hp").unwrap();
    assert!(wait_until(|| recorder.count("default:Render:hp") == 1));
    let default = engine.default_device(DeviceRole::Render).unwrap().unwrap();
    assert_eq!(default.id, "hp");
    assert_eq!(engine.devices(Some(DeviceRole::Render)).len(), 2);
}

#[test]
fn default_device_rejects_duplex() {
    let backend = backend();
    let (engine, _recorder) = start(&backend);
    assert!(matches!(
        engine.default_device(DeviceRole::Duplex),
        Err(EngineError::Configuration(_))
    ));
}

#[test]
fn render_fails_over_when_its_device_is_unplugged() {
    let backend = backend();
    backend
        .plug(VirtualDevice::new("hp", "Headphones", DeviceRole::Render))
        .unwrap();
    let (engine, recorder) = start(&backend);
    let hp = engine.device_by_id("hp").unwrap();
    engine.initialize_render(Some(&hp), None).unwrap();

    backend.unplug("hp").unwrap();
    assert!(wait_until(|| {
        engine.is_render_initialized()
            && engine.render_device().is_some_and(|d| d.id == "speakers")
    }));
    assert!(wait_until(|| recorder.count("removed:hp") == 1));
    assert_eq!(backend.render_device().map(|d| d.id), Some("speakers".to_string()));
    assert!(engine.diagnostics().failovers >= 1);

    let written = backend.render_writes();
    assert!(wait_until(|| backend.render_writes() > written));
}

#[test]
fn stop_completes_while_a_render_delegate_queries_the_engine() {
    let backend = backend();
    let (engine, delegate) = start_querying(&backend);
    engine.initialize_render(None, None).unwrap();
    backend.fail_next(
        BackendOperation::WriteRender,
        EngineError::device(-5, "VirtualAudio", "write failed"),
    );
    assert!(wait_until(|| delegate.entered.load(Ordering::SeqCst) == 1));

    let (done_tx, done_rx) = mpsc::channel();
    let stopper = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let result = engine.stop_rendering();
            let _ = done_tx.send(());
            result
        })
    };
    done_rx.recv_timeout(WAIT).expect("stop_rendering deadlocked");
    stopper.join().unwrap().unwrap();

    assert_eq!(delegate.returned.load(Ordering::SeqCst), 1);
    assert!(delegate.seen_device.lock().is_some());
    assert!(!backend.is_render_open());
    assert_eq!(engine.render_state(), StreamState::Stopped);
}

#[test]
fn failover_completes_while_a_render_delegate_queries_the_engine() {
    let backend = backend();
    backend
        .plug(VirtualDevice::new("hp", "Headphones", DeviceRole::Render))
        .unwrap();
    let (engine, delegate) = start_querying(&backend);
    let hp = engine.device_by_id("hp").unwrap();
    engine.initialize_render(Some(&hp), None).unwrap();

    backend.unplug("hp").unwrap();
    assert!(wait_until(|| {
        engine.is_render_initialized()
            && engine.render_device().is_some_and(|d| d.id == "speakers")
    }));
    assert!(wait_until(|| {
        delegate.returned.load(Ordering::SeqCst) == delegate.entered.load(Ordering::SeqCst)
    }));
    assert_eq!(backend.render_device().map(|d| d.id), Some("speakers".to_string()));
    assert!(engine.diagnostics().failovers >= 1);

    let written = backend.render_writes();
    assert!(wait_until(|| backend.render_writes() > written));
}

#[test]
fn capture_fails_over_when_its_device_is_unplugged() {
    let backend = Arc::new(
        VirtualBackend::with_default_devices()
            .with_period(Duration::from_millis(5))
            .with_capture_signal(CaptureSignal::Constant(0.5)),
    );
    backend
        .plug(VirtualDevice::new("usb-mic", "USB Microphone", DeviceRole::Capture))
        .unwrap();
    let (engine, recorder) = start(&backend);
    let usb = engine.device_by_id("usb-mic").unwrap();
    engine.initialize_capture(Some(&usb), None).unwrap();
    assert_eq!(engine.capture_device().map(|d| d.id), Some("usb-mic".to_string()));

    backend.unplug("usb-mic").unwrap();
    assert!(wait_until(|| {
        engine.is_capture_initialized() && engine.capture_device().is_some_and(|d| d.id == "mic")
    }));
    assert!(wait_until(|| recorder.count("removed:usb-mic") == 1));
    assert_eq!(backend.capture_device().map(|d| d.id), Some("mic".to_string()));
    assert!(engine.diagnostics().failovers >= 1);

    let delivered = recorder.captured.load(Ordering::SeqCst);
    assert!(wait_until(|| recorder.captured.load(Ordering::SeqCst) > delivered));
    assert_eq!(*recorder.last_capture.lock(), Some(0.5));
    assert!(!engine.is_render_initialized());
}

#[test]
fn failed_failover_is_retried_when_a_device_appears() {
    let backend = Arc::new(VirtualBackend::new().with_period(Duration::from_millis(5)));
    backend
        .plug(VirtualDevice::new("spk", "Speakers", DeviceRole::Render))
        .unwrap();
    let (engine, recorder) = start(&backend);
    engine.initialize_render(None, None).unwrap();

    backend.unplug("spk").unwrap();
    assert!(wait_until(|| recorder.count("removed:spk") == 1));
    assert!(!engine.is_render_initialized());
    assert!(recorder.error_count() > 0);

    backend
        .plug(VirtualDevice::new("usb", "USB Speakers", DeviceRole::Render))
        .unwrap();
    assert!(wait_until(|| {
        engine.is_render_initialized() && engine.render_device().is_some_and(|d| d.id == "usb")
    }));
    let added = recorder.position("added:usb").unwrap();
    assert!(recorder.position("removed:spk").unwrap() < added);
}

#[test]
fn failover_can_be_disabled() {
    let backend = backend();
    backend
        .plug(VirtualDevice::new("hp", "Headphones", DeviceRole::Render))
        .unwrap();
    let config = EngineConfig {
        auto_failover: false,
        ..config()
    };
    let engine = Engine::new(backend.clone(), config).unwrap();
    let recorder = Arc::new(Recorder::default());
    engine.subscribe(recorder.clone());
    let hp = engine.device_by_id("hp").unwrap();
    engine.initialize_render(Some(&hp), None).unwrap();

    backend.unplug("hp").unwrap();
    assert!(wait_until(|| recorder.count("removed:hp") == 1));
    assert!(wait_until(|| !engine.is_render_initialized()));
    assert_eq!(engine.diagnostics().failovers, 0);
}

#[test]
fn enumeration_failure_keeps_previous_snapshot() {
    let backend = backend();
    let (engine, recorder) = start(&backend);
    backend.fail_next(
        BackendOperation::Enumerate,
        EngineError::device(-5, "VirtualAudio", "bus reset"),
    );

    assert!(wait_until(|| recorder.error_count() > 0));
    assert_eq!(engine.devices(None).len(), 2);
    thread::sleep(Duration::from_millis(30));
    assert!(recorder.events.lock().is_empty());
}

#[test]
fn output_gain_and_tuning_reach_backend() {
    let backend = backend();
    let (engine, _recorder) = start(&backend);
    engine.set_output_gain(0.25).unwrap();
    assert_abs_diff_eq!(backend.output_gain().unwrap(), 0.25, epsilon = 1e-6);
    assert!(engine.set_output_gain(2.0).is_err());

    let mut tuning = BackendTuning::new();
    tuning.set("buffer_ms", 40);
    engine.set_backend_tuning(&tuning).unwrap();
    assert_eq!(
        engine.backend_tuning().unwrap().get("buffer_ms").and_then(|v| v.as_u64()),
        Some(40)
    );
}

#[test]
fn saved_wav_can_be_loaded_and_played() {
    let backend = backend();
    let (engine, recorder) = start(&backend);
    let path = temp_file_path("roundtrip");
    let _ = std::fs::remove_file(&path);

    let tone = SampleBuffer::filled(240, ChannelLayout::MONO, 48000, 0.5).unwrap();
    let target = AudioFormat::new(SampleEncoding::Pcm, 16, ChannelLayout::MONO, 48000);
    let saved = engine.save_to_file(&tone, &path, &target, false).unwrap();
    assert_eq!(saved.bytes_written, 44 + 240 * 2);
    assert!(engine.save_to_file(&tone, &path, &target, false).is_err());

    engine.initialize_render(None, None).unwrap();
    let loaded = engine.load(&path, 1).unwrap();
    let (channels, frames, paused) = engine
        .with_object(loaded, |o| (o.buffer.channel_count(), o.buffer.frame_count(), o.is_paused))
        .unwrap();
    assert_eq!(channels, 2);
    assert_eq!(frames, 240);
    assert!(paused);

    let played = engine.play(&path, 1, false).unwrap();
    assert!(wait_until(|| recorder.finished.lock().iter().any(|f| f.id == played)));
    let event = recorder
        .finished
        .lock()
        .iter()
        .find(|f| f.id == played)
        .cloned()
        .unwrap();
    assert_eq!(event.file_path.as_deref(), Some(path.as_path()));
    assert!(engine.object_exists(loaded));

    std::fs::remove_file(&path).ok();
}

#[test]
fn playlist_plays_files_back_to_back() {
    let backend = backend();
    let (engine, recorder) = start(&backend);
    let target = AudioFormat::new(SampleEncoding::Pcm, 16, ChannelLayout::MONO, 24000);
    let first = temp_file_path("playlist_first");
    let second = temp_file_path("playlist_second");
    for path in [&first, &second] {
        let _ = std::fs::remove_file(path);
        let tone = SampleBuffer::filled(120, ChannelLayout::MONO, 24000, 0.5).unwrap();
        engine.save_to_file(&tone, path, &target, false).unwrap();
    }
    let missing = temp_file_path("playlist_missing");
    let _ = std::fs::remove_file(&missing);

    engine.initialize_render(None, None).unwrap();
    let playlist = engine.create_playlist();
    playlist.add_all([first.clone(), missing, second.clone()]);
    assert_eq!(playlist.files(), vec![first.clone(), second.clone()]);
    assert_eq!(engine.object_count(), 1);

    playlist.start();
    assert!(wait_until(|| recorder.finished.lock().len() == 2));
    assert!(playlist.is_empty());
    let finished: Vec<_> = recorder
        .finished
        .lock()
        .iter()
        .filter_map(|f| f.file_path.clone())
        .collect();
    assert_eq!(finished, vec![first.clone(), second.clone()]);
    assert_eq!(engine.object_count(), 0);

    std::fs::remove_file(&first).ok();
    std::fs::remove_file(&second).ok();
}

#[test]
fn shutdown_closes_streams_and_rejects_new_work() {
    let backend = backend();
    let (engine, _recorder) = start(&backend);
    engine.initialize_render(None, None).unwrap();
    engine.initialize_capture(None, None).unwrap();

    engine.shutdown();
    assert!(engine.is_disposing());
    assert!(!backend.is_render_open());
    assert!(!backend.is_capture_open());
    assert_eq!(engine.initialize_render(None, None).unwrap_err(), EngineError::Disposed);

    engine.shutdown();
    drop(engine);
}
