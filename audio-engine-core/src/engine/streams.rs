//! Render and capture stream lifecycle.
//!
//! Each stream is an OS thread polling the backend. Cancellation is
//! cooperative: every thread is started with a generation number and runs
//! while that generation is the stream's active one and the engine is not
//! disposing. Stopping clears the active generation and joins the thread
//! with the slot lock released, so delegates running on a stream thread can
//! query or restart the engine without deadlocking a concurrent stop.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::mixing::object::RenderRequest;
use crate::models::device::{AudioDevice, DeviceRole};
use crate::models::diagnostics::DiagnosticsCounters;
use crate::models::error::EngineError;
use crate::models::format::AudioFormat;
use crate::models::state::StreamState;
use crate::traits::backend::OpenedStream;

use super::EngineShared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Render,
    Capture,
}

impl StreamKind {
    pub fn role(self) -> DeviceRole {
        match self {
            Self::Render => DeviceRole::Render,
            Self::Capture => DeviceRole::Capture,
        }
    }

    fn thread_name(self) -> &'static str {
        match self {
            Self::Render => "audio-render",
            Self::Capture => "audio-capture",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render => write!(f, "render"),
            Self::Capture => write!(f, "capture"),
        }
    }
}

/// Stream bookkeeping owned by the lifecycle methods.
#[derive(Default)]
pub(crate) struct StreamSlot {
    pub thread: Option<JoinHandle<()>>,
    /// The backend stream is open and must be closed.
    pub open: bool,
    pub state: StreamState,
    /// Device currently bound; cleared on stop.
    pub device: Option<AudioDevice>,
    /// Last negotiated format; kept after stop for fail-over.
    pub format: Option<AudioFormat>,
}

pub(crate) struct StreamControl {
    /// Generation of the thread allowed to run; 0 when stopped.
    active: AtomicU64,
    next_generation: AtomicU64,
    /// A fail-over attempt failed and should be retried.
    pub failover_pending: AtomicBool,
    pub slot: Mutex<StreamSlot>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
            failover_pending: AtomicBool::new(false),
            slot: Mutex::new(StreamSlot::default()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.active.load(Ordering::SeqCst) != 0
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active.load(Ordering::SeqCst) == generation
    }

    /// Called by a failing stream thread; leaves a newer stream alone.
    fn retire(&self, generation: u64) {
        let _ = self
            .active
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

impl EngineShared {
    pub(crate) fn stream(&self, kind: StreamKind) -> &StreamControl {
        match kind {
            StreamKind::Render => &self.render,
            StreamKind::Capture => &self.capture,
        }
    }

    /// Open a stream and start its thread, stopping any running one first.
    pub(crate) fn initialize_stream(
        self: &Arc<Self>,
        kind: StreamKind,
        device: Option<&AudioDevice>,
        format: Option<AudioFormat>,
    ) -> Result<OpenedStream, EngineError> {
        if self.is_disposing() {
            return Err(EngineError::Disposed);
        }
        let requested = format.unwrap_or(match kind {
            StreamKind::Render => self.config.default_render_format,
            StreamKind::Capture => self.config.default_capture_format,
        });
        requested.validate()?;
        if let Some(device) = device {
            if !device.role.supports(kind.role()) {
                return Err(EngineError::Configuration(format!(
                    "device '{}' cannot be opened for {}",
                    device.name, kind
                )));
            }
        }

        let control = self.stream(kind);
        let mut slot = self.quiesce(kind);
        // Shutdown may have joined this stream while we waited.
        if self.is_disposing() {
            return Err(EngineError::Disposed);
        }
        if let Err(e) = self.close_locked(kind, &mut slot) {
            log::warn!("Closing previous {} stream failed: {}", kind, e);
        }

        let opened = match kind {
            StreamKind::Render => self.backend.open_render(device, &requested)?,
            StreamKind::Capture => self.backend.open_capture(device, &requested)?,
        };
        slot.open = true;
        slot.format = Some(opened.format);
        if kind == StreamKind::Capture {
            self.capture_paused.store(false, Ordering::SeqCst);
        }

        let generation = control.next_generation.fetch_add(1, Ordering::SeqCst);
        control.active.store(generation, Ordering::SeqCst);
        let shared = Arc::clone(self);
        let format = opened.format;
        let spawned = thread::Builder::new()
            .name(kind.thread_name().into())
            .spawn(move || match kind {
                StreamKind::Render => render_loop(shared, format, generation),
                StreamKind::Capture => capture_loop(shared, format, generation),
            });
        match spawned {
            Ok(handle) => slot.thread = Some(handle),
            Err(e) => {
                control.active.store(0, Ordering::SeqCst);
                if let Err(close_err) = self.close_locked(kind, &mut slot) {
                    log::warn!("Closing {} stream after spawn failure failed: {}", kind, close_err);
                }
                return Err(EngineError::ResourceExhausted(format!(
                    "failed to spawn {} thread: {}",
                    kind, e
                )));
            }
        }
        slot.device = Some(opened.device.clone());
        slot.state = StreamState::Active;
        control.failover_pending.store(false, Ordering::SeqCst);

        log::info!(
            "{} stream initialized on '{}' ({:?} {}-bit, {} ch, {} Hz)",
            kind,
            opened.device.name,
            opened.format.encoding,
            opened.format.bits_per_sample,
            opened.format.channel_count(),
            opened.format.sample_rate
        );
        Ok(opened)
    }

    /// Stop a stream. Calling it on a stopped stream does nothing.
    pub(crate) fn stop_stream(&self, kind: StreamKind) -> Result<(), EngineError> {
        let mut slot = self.quiesce(kind);
        self.close_locked(kind, &mut slot)
    }

    /// Stop every thread of a stream and return its slot locked, with no
    /// thread left running. Joins happen with the lock released.
    pub(crate) fn quiesce(&self, kind: StreamKind) -> MutexGuard<'_, StreamSlot> {
        let control = self.stream(kind);
        loop {
            let mut slot = control.slot.lock();
            control.active.store(0, Ordering::SeqCst);
            let Some(handle) = slot.thread.take() else {
                return slot;
            };
            drop(slot);
            // A delegate running on the stream thread itself cannot wait for it.
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                log::error!("{} thread panicked", kind);
            }
        }
    }

    pub(crate) fn close_locked(&self, kind: StreamKind, slot: &mut StreamSlot) -> Result<(), EngineError> {
        if !slot.open {
            return Ok(());
        }
        slot.open = false;
        slot.device = None;
        slot.state = StreamState::Stopped;
        let result = match kind {
            StreamKind::Render => self.backend.close_render(),
            StreamKind::Capture => self.backend.close_capture(),
        };
        log::info!("{} stream stopped", kind);
        result
    }

    /// Report a failure on an engine-owned thread.
    pub(crate) fn report_error(&self, error: &EngineError) {
        DiagnosticsCounters::add(&self.diagnostics.stream_errors, 1);
        self.delegates.emit("error", |d| d.on_error(error));
    }

    fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.config.stream_timeout_ms)
    }

    fn keep_running(&self, kind: StreamKind, generation: u64) -> bool {
        !self.is_disposing() && self.stream(kind).is_current(generation)
    }
}

fn render_loop(shared: Arc<EngineShared>, format: AudioFormat, generation: u64) {
    let timeout = shared.stream_timeout();
    let chunk_frames = shared.config.render_chunk_frames(format.sample_rate);
    log::debug!("Render thread started ({} frames per cycle)", chunk_frames);

    while shared.keep_running(StreamKind::Render, generation) {
        if let Err(e) = render_cycle(&shared, &format, timeout, chunk_frames) {
            log::error!("Render stream on {} failed: {}", shared.backend.name(), e);
            shared.render.retire(generation);
            shared.report_error(&e);
            break;
        }
    }
    log::debug!("Render thread exiting");
}

fn render_cycle(
    shared: &EngineShared,
    format: &AudioFormat,
    timeout: Duration,
    chunk_frames: usize,
) -> Result<(), EngineError> {
    let ready = shared.backend.render_frames_ready(timeout)?;
    if ready == 0 {
        return Ok(());
    }
    let request = RenderRequest {
        frame_count: ready.min(chunk_frames),
        format: *format,
    };
    let mix = shared.registry.mix_once(&request, shared.master_volume())?;
    shared.backend.write_render(&mix.buffer)?;

    DiagnosticsCounters::add(&shared.diagnostics.render_cycles, 1);
    DiagnosticsCounters::add(&shared.diagnostics.frames_rendered, request.frame_count as u64);
    for event in &mix.finished {
        shared.delegates.emit("object finished", |d| d.on_object_finished(event));
    }
    for (_, error) in &mix.failed {
        DiagnosticsCounters::add(&shared.diagnostics.objects_dropped, 1);
        shared.delegates.emit("error", |d| d.on_error(error));
    }
    Ok(())
}

fn capture_loop(shared: Arc<EngineShared>, format: AudioFormat, generation: u64) {
    let timeout = shared.stream_timeout();
    log::debug!("Capture thread started ({} Hz)", format.sample_rate);

    while shared.keep_running(StreamKind::Capture, generation) {
        match shared.backend.read_capture(timeout) {
            Ok(Some(buffer)) => {
                // Paused capture keeps draining the device so resume is instant.
                if shared.capture_paused.load(Ordering::SeqCst) {
                    continue;
                }
                DiagnosticsCounters::add(&shared.diagnostics.capture_chunks, 1);
                DiagnosticsCounters::add(&shared.diagnostics.frames_captured, buffer.frame_count() as u64);
                shared.delegates.emit("capture", |d| d.on_capture(&buffer));
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Capture stream on {} failed: {}", shared.backend.name(), e);
                shared.capture.retire(generation);
                shared.report_error(&e);
                break;
            }
        }
    }
    log::debug!("Capture thread exiting");
}
