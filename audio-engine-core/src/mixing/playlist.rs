//! Sequential playback of a list of audio files.
//!
//! The playlist keeps exactly one registered object: the head of its file
//! list. When that object finishes, its `on_finished` callback drops the
//! head and registers the next file, on the render thread. Files that fail
//! to load are skipped with a warning.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::models::object_id::ObjectId;

use super::object::{AudioObject, ChunkProducer, FinishedPlaying, RenderRequest, RenderedChunk};
use super::registry::ObjectRegistry;

/// Turns a file into a ready-to-register object.
pub trait TrackLoader: Send + Sync {
    fn load_track(&self, path: &Path) -> Result<AudioObject, EngineError>;
}

/// How one track hands over to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionEffect {
    #[default]
    None,
    /// Silence before every track but the first.
    Delay,
    /// Fade in (except the first track) and fade out.
    Fade,
    FadeIn,
    FadeOut,
}

#[derive(Debug, Clone, Copy, Default)]
struct Transition {
    effect: TransitionEffect,
    duration: Duration,
}

struct PlaylistState {
    files: Vec<PathBuf>,
    /// Object playing `files[0]`.
    current: Option<ObjectId>,
    paused: bool,
}

struct PlaylistInner {
    registry: Arc<ObjectRegistry>,
    loader: Arc<dyn TrackLoader>,
    state: Mutex<PlaylistState>,
    transition: Arc<Mutex<Transition>>,
}

/// An ordered list of files played one after another.
///
/// Starts stopped. Changes to the head of the list (insert at 0, remove at
/// 0, skip) replace the playing track immediately. Dropping the playlist
/// removes its current track.
pub struct AudioPlaylist {
    inner: Arc<PlaylistInner>,
}

impl AudioPlaylist {
    pub fn new(registry: Arc<ObjectRegistry>, loader: Arc<dyn TrackLoader>) -> Self {
        Self {
            inner: Arc::new(PlaylistInner {
                registry,
                loader,
                state: Mutex::new(PlaylistState {
                    files: Vec::new(),
                    current: None,
                    paused: true,
                }),
                transition: Arc::new(Mutex::new(Transition::default())),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.inner.state.lock().files.clone()
    }

    /// Object currently playing the head of the list.
    pub fn current_object(&self) -> Option<ObjectId> {
        self.inner.state.lock().current
    }

    pub fn transition_effect(&self) -> TransitionEffect {
        self.inner.transition.lock().effect
    }

    /// Applies from the next rendered chunk on, including to the current track.
    pub fn set_transition_effect(&self, effect: TransitionEffect) {
        self.inner.transition.lock().effect = effect;
    }

    pub fn transition_duration(&self) -> Duration {
        self.inner.transition.lock().duration
    }

    pub fn set_transition_duration(&self, duration: Duration) {
        self.inner.transition.lock().duration = duration;
    }

    pub fn start(&self) {
        self.set_paused(false);
    }

    pub fn stop(&self) {
        self.set_paused(true);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    fn set_paused(&self, paused: bool) {
        let current = {
            let mut state = self.inner.state.lock();
            state.paused = paused;
            state.current
        };
        // The track may have finished meanwhile; its successor reads `paused`.
        if let Some(id) = current {
            let _ = self.inner.registry.with_object(id, |object| object.is_paused = paused);
        }
    }

    pub fn add(&self, path: impl Into<PathBuf>) {
        self.add_all([path.into()]);
    }

    pub fn add_all(&self, paths: impl IntoIterator<Item = PathBuf>) {
        let mut state = self.inner.state.lock();
        let was_empty = state.files.is_empty();
        state.files.extend(paths);
        if was_empty && !state.files.is_empty() {
            self.inner.change_track(&mut state);
        }
    }

    /// Insert before `index`; `index == len()` appends.
    pub fn insert(&self, path: impl Into<PathBuf>, index: usize) -> Result<(), EngineError> {
        self.insert_all([path.into()], index)
    }

    pub fn insert_all(&self, paths: impl IntoIterator<Item = PathBuf>, index: usize) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock();
        if index > state.files.len() {
            return Err(out_of_range(index, state.files.len()));
        }
        let before = state.files.len();
        let tail = state.files.split_off(index);
        state.files.extend(paths);
        state.files.extend(tail);
        if index == 0 && state.files.len() > before {
            self.inner.change_track(&mut state);
        }
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<PathBuf, EngineError> {
        let mut state = self.inner.state.lock();
        if index >= state.files.len() {
            return Err(out_of_range(index, state.files.len()));
        }
        let removed = state.files.remove(index);
        if index == 0 {
            self.inner.change_track(&mut state);
        }
        Ok(removed)
    }

    /// Remove up to `count` files starting at `index`.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<(), EngineError> {
        if count == 0 {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        if index >= state.files.len() {
            return Err(out_of_range(index, state.files.len()));
        }
        let end = index.saturating_add(count).min(state.files.len());
        state.files.drain(index..end);
        if index == 0 {
            self.inner.change_track(&mut state);
        }
        Ok(())
    }

    /// Remove the first occurrence of `path`. Returns `false` if absent.
    pub fn remove_path(&self, path: &Path) -> bool {
        let index = self.inner.state.lock().files.iter().position(|f| f == path);
        match index {
            Some(index) => self.remove(index).is_ok(),
            None => false,
        }
    }

    pub fn skip(&self) {
        self.skip_n(1);
    }

    /// Drop the next `n` files, the playing one included.
    pub fn skip_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.inner.state.lock();
        if n >= state.files.len() {
            state.files.clear();
            self.inner.release_current(&mut state);
            return;
        }
        state.files.drain(..n);
        self.inner.change_track(&mut state);
    }

    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.files.clear();
        self.inner.release_current(&mut state);
    }
}

impl Drop for AudioPlaylist {
    fn drop(&mut self) {
        self.clear();
    }
}

impl PlaylistInner {
    /// Replace the current object with one for `files[0]`, skipping files
    /// that fail to load.
    fn change_track(self: &Arc<Self>, state: &mut PlaylistState) {
        // The first track of a run starts without a fade-in or delay.
        let intro = state.current.is_some();
        self.release_current(state);

        while let Some(path) = state.files.first().cloned() {
            match self.loader.load_track(&path) {
                Ok(object) => {
                    let id = self.register(object, intro, state.paused);
                    log::info!("Playlist track '{}' is up ({})", path.display(), id);
                    state.current = Some(id);
                    return;
                }
                Err(e) => {
                    state.files.remove(0);
                    if state.files.is_empty() {
                        log::warn!("Could not play '{}': {}; playlist finished", path.display(), e);
                    } else {
                        log::warn!("Could not play '{}': {}; trying next file", path.display(), e);
                    }
                }
            }
        }
    }

    fn register(self: &Arc<Self>, mut object: AudioObject, intro: bool, paused: bool) -> ObjectId {
        object.play_count = 1;
        object.is_persistent = false;
        object.is_paused = paused;
        object.frame_index = 0;
        let producer = TransitionProducer {
            inner: object.producer.take(),
            transition: Arc::clone(&self.transition),
            intro,
            played: 0,
            delayed: 0,
        };
        object.set_producer(Box::new(producer));

        let playlist: Weak<PlaylistInner> = Arc::downgrade(self);
        object.set_on_finished(move |event: &FinishedPlaying, _registry: &ObjectRegistry| {
            if let Some(playlist) = playlist.upgrade() {
                playlist.track_finished(event.id);
            }
        });
        self.registry.insert(object)
    }

    fn track_finished(self: &Arc<Self>, id: ObjectId) {
        let mut state = self.state.lock();
        if state.current != Some(id) {
            return;
        }
        if !state.files.is_empty() {
            state.files.remove(0);
        }
        self.change_track(&mut state);
    }

    fn release_current(&self, state: &mut PlaylistState) {
        if let Some(id) = state.current.take() {
            self.registry.destroy(id);
        }
    }
}

fn out_of_range(index: usize, len: usize) -> EngineError {
    EngineError::Configuration(format!("playlist index {} out of range (len {})", index, len))
}

/// Wraps a track's own producer and shapes its chunks for the transition.
struct TransitionProducer {
    inner: Option<Box<dyn ChunkProducer>>,
    transition: Arc<Mutex<Transition>>,
    /// Fade-in and delay apply to this track.
    intro: bool,
    /// Output frames produced from the track so far.
    played: usize,
    /// Silent frames emitted so far for a delay.
    delayed: usize,
}

impl ChunkProducer for TransitionProducer {
    fn produce(&mut self, object: &mut AudioObject, request: &RenderRequest) -> Result<RenderedChunk, EngineError> {
        let transition = *self.transition.lock();
        let rate = request.format.sample_rate;
        let duration = (transition.duration.as_secs_f64() * rate as f64).round() as usize;

        // Delay runs at chunk granularity.
        if self.intro && transition.effect == TransitionEffect::Delay && self.delayed < duration {
            self.delayed += request.frame_count;
            return Ok(RenderedChunk {
                buffer: SampleBuffer::new(request.frame_count, request.format.channel_layout, rate)?,
                finished: false,
            });
        }

        let mut chunk = match self.inner.as_mut() {
            Some(producer) => producer.produce(object, request)?,
            None => object.render_default(request)?,
        };

        let fade_in = self.intro && matches!(transition.effect, TransitionEffect::Fade | TransitionEffect::FadeIn);
        let fade_out = matches!(transition.effect, TransitionEffect::Fade | TransitionEffect::FadeOut);
        let frames = chunk.buffer.frame_count();
        if duration > 0 && (fade_in || fade_out) {
            let remaining = remaining_output_frames(object, rate);
            for frame in 0..frames {
                let mut gain: f64 = 1.0;
                if fade_in {
                    gain = gain.min((self.played + frame) as f64 / duration as f64);
                }
                if fade_out {
                    gain = gain.min((remaining + frames - 1 - frame) as f64 / duration as f64);
                }
                if gain < 1.0 {
                    for sample in chunk.buffer.frame_mut(frame) {
                        *sample *= gain as f32;
                    }
                }
            }
        }
        self.played += frames;
        Ok(chunk)
    }
}

/// Frames left in the source after its cursor, counted at `rate`.
fn remaining_output_frames(object: &AudioObject, rate: u32) -> usize {
    let left = object.buffer.frame_count().saturating_sub(object.frame_index) as u64;
    let source_rate = object.buffer.sample_rate() as u64;
    if source_rate == 0 {
        return 0;
    }
    (left * rate as u64 / source_rate) as usize
}
