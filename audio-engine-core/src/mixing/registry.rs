use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::models::object_id::ObjectId;

use super::object::{AudioObject, FinishedPlaying, RenderRequest};

struct Slot {
    id: ObjectId,
    /// Kept here so lookups by name also see lent-out objects.
    name: String,
    /// `None` while the object is lent out to the mixer or to `with_object`.
    object: Option<AudioObject>,
    /// Thread holding the object while it is lent out.
    lent_to: Option<ThreadId>,
    /// Set by `destroy` on a lent-out object; honored when it comes back.
    destroy_requested: bool,
}

#[derive(Default)]
struct RegistryState {
    slots: Vec<Slot>,
    categories: HashMap<String, f32>,
}

impl RegistryState {
    fn position(&self, id: ObjectId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    fn live(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|slot| !slot.destroy_requested)
    }
}

/// Result of one [`ObjectRegistry::mix_once`] call.
#[derive(Debug)]
pub struct MixOutput {
    /// Exactly the requested number of frames, in the render layout and rate.
    pub buffer: SampleBuffer,
    /// Objects that played their last pass this cycle.
    pub finished: Vec<FinishedPlaying>,
    /// Objects dropped because their producer, processor or callback failed.
    pub failed: Vec<(ObjectId, EngineError)>,
    /// Divisor used for this cycle.
    pub active: usize,
}

/// Owner of every live [`AudioObject`] and the mixing scheduler.
///
/// Objects are kept in insertion order and addressed by [`ObjectId`]. The
/// lock guards bookkeeping only: producers, processors, `on_finished`
/// callbacks and `with_object` closures run on an object moved out of its
/// slot, with the lock released, so they may call back into the registry
/// from any thread. Another thread asking for a lent-out object waits for
/// it to come back; the thread already holding it gets
/// [`EngineError::ObjectInUse`] instead of aliasing it.
pub struct ObjectRegistry {
    state: Mutex<RegistryState>,
    /// Signalled whenever a lent-out object is put back.
    returned: Condvar,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            returned: Condvar::new(),
        }
    }

    /// Register `object`; its id stays valid as a handle after removal.
    pub fn insert(&self, object: AudioObject) -> ObjectId {
        let id = object.id();
        log::debug!("Registering audio object {} ('{}')", id, object.name);
        self.state.lock().slots.push(Slot {
            id,
            name: object.name.clone(),
            object: Some(object),
            lent_to: None,
            destroy_requested: false,
        });
        id
    }

    /// Remove an object. Returns `false` if it was not registered.
    pub fn destroy(&self, id: ObjectId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let Some(index) = state.position(id) else {
                return false;
            };
            let slot = &mut state.slots[index];
            if slot.destroy_requested {
                return false;
            }
            if slot.object.is_none() {
                slot.destroy_requested = true;
                log::debug!("Audio object {} is in use; removal deferred", id);
                return true;
            }
            state.slots.remove(index)
        };
        log::debug!("Destroyed audio object {}", id);
        drop(removed);
        true
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        let state = self.state.lock();
        let found = state.live().any(|slot| slot.id == id);
        found
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        let count = state.live().count();
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the `index`-th object in insertion order.
    pub fn id_at(&self, index: usize) -> Option<ObjectId> {
        let state = self.state.lock();
        let id = state.live().nth(index).map(|slot| slot.id);
        id
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let state = self.state.lock();
        let ids = state.live().map(|slot| slot.id).collect();
        ids
    }

    /// First object with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        let state = self.state.lock();
        let id = state.live().find(|slot| slot.name == name).map(|slot| slot.id);
        id
    }

    /// Run `f` with exclusive access to an object.
    ///
    /// Waits while another thread holds the object. `f` runs without the
    /// registry lock and may call back into the registry, except to access
    /// this same object.
    pub fn with_object<R>(&self, id: ObjectId, f: impl FnOnce(&mut AudioObject) -> R) -> Result<R, EngineError> {
        let object = self.lend(id)?;
        let mut lease = Lease {
            registry: self,
            object: Some(object),
        };
        let object = lease.object.as_mut().ok_or(EngineError::ObjectInUse(id))?;
        Ok(f(object))
    }

    /// Add a named volume group. Fails if the name is taken.
    pub fn register_category(&self, name: &str, volume: f32) -> Result<(), EngineError> {
        check_volume(volume)?;
        let mut state = self.state.lock();
        if state.categories.contains_key(name) {
            return Err(EngineError::Configuration(format!("category '{}' already exists", name)));
        }
        state.categories.insert(name.to_string(), volume);
        Ok(())
    }

    pub fn unregister_category(&self, name: &str) -> bool {
        self.state.lock().categories.remove(name).is_some()
    }

    pub fn set_category_volume(&self, name: &str, volume: f32) -> Result<(), EngineError> {
        check_volume(volume)?;
        let mut state = self.state.lock();
        match state.categories.get_mut(name) {
            Some(current) => {
                *current = volume;
                Ok(())
            }
            None => Err(EngineError::Configuration(format!("unknown category '{}'", name))),
        }
    }

    pub fn category_volume(&self, name: &str) -> Option<f32> {
        self.state.lock().categories.get(name).copied()
    }

    /// Mix one chunk of every registered, non-paused object.
    ///
    /// Each object contributes `sample * volume * categories * master / N`,
    /// where `N` is the number of objects eligible at the start of the call;
    /// objects added meanwhile join from the next cycle on. Objects held by
    /// `with_object` at that moment sit this cycle out. An object whose
    /// producer or processor fails (or panics) is removed and reported in
    /// [`MixOutput::failed`]; the others are still mixed.
    pub fn mix_once(&self, request: &RenderRequest, master_volume: f32) -> Result<MixOutput, EngineError> {
        let buffer = SampleBuffer::new(
            request.frame_count,
            request.format.channel_layout,
            request.format.sample_rate,
        )?;
        let mut mix = MixOutput {
            buffer,
            finished: Vec::new(),
            failed: Vec::new(),
            active: 0,
        };

        let active: Vec<ObjectId> = {
            let state = self.state.lock();
            let ids: Vec<ObjectId> = state
                .live()
                .filter(|slot| slot.object.as_ref().is_some_and(|o| !o.is_paused))
                .map(|slot| slot.id)
                .collect();
            ids
        };
        if active.is_empty() {
            return Ok(mix);
        }
        mix.active = active.len();
        let divisor = active.len() as f32;

        for id in active {
            let Some((mut object, category_gain)) = self.take_for_mix(id) else {
                continue;
            };
            let weight = object.volume * category_gain * master_volume / divisor;

            let mut producer = object.producer.take();
            let produced = guarded(|| match producer.as_mut() {
                Some(producer) => producer.produce(&mut object, request),
                None => object.render_default(request),
            });
            if object.producer.is_none() {
                object.producer = producer;
            }
            let chunk = produced.and_then(|mut chunk| {
                if let Some(processor) = object.processor.as_mut() {
                    guarded(|| processor.process(&mut chunk.buffer))?;
                }
                Ok(chunk)
            });

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    log::warn!("Dropping audio object {} ('{}'): {}", id, object.name, err);
                    self.remove_slot(id);
                    drop(object);
                    mix.failed.push((id, err));
                    continue;
                }
            };

            log::trace!(
                "Mixing {} of {} frames from {} at weight {}",
                chunk.buffer.frame_count(),
                request.frame_count,
                id,
                weight
            );
            accumulate(&mut mix.buffer, &chunk.buffer, weight);

            if !chunk.finished {
                self.restore(object);
                continue;
            }
            match object.play_count {
                0 => {
                    object.frame_index = 0;
                    self.restore(object);
                }
                1 => {
                    let (event, failure) = self.retire(object);
                    if let Some(err) = failure {
                        mix.failed.push((id, err));
                    }
                    mix.finished.push(event);
                }
                _ => {
                    object.play_count -= 1;
                    object.frame_index = 0;
                    self.restore(object);
                }
            }
        }

        Ok(mix)
    }

    /// Move an object out for rendering, unless a callback earlier this
    /// cycle paused or destroyed it or someone else holds it.
    fn take_for_mix(&self, id: ObjectId) -> Option<(AudioObject, f32)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let index = state.position(id)?;
        let slot = &mut state.slots[index];
        if slot.destroy_requested || !slot.object.as_ref().is_some_and(|o| !o.is_paused) {
            return None;
        }
        let object = slot.object.take()?;
        slot.lent_to = Some(thread::current().id());
        let gain = category_gain(&state.categories, &object.categories);
        Some((object, gain))
    }

    /// Final pass of an object: rewind, deregister (or pause if persistent),
    /// then run its `on_finished` callback.
    fn retire(&self, mut object: AudioObject) -> (FinishedPlaying, Option<EngineError>) {
        let id = object.id();
        object.frame_index = 0;
        let removed = !object.is_persistent;
        let event = object.finished_event(removed);
        let callback = object.on_finished.take();

        let retired = if removed {
            self.remove_slot(id);
            log::debug!("Audio object {} ('{}') finished playing", id, object.name);
            Some(object)
        } else {
            object.is_paused = true;
            log::debug!("Persistent audio object {} ('{}') finished; paused", id, object.name);
            self.restore(object);
            None
        };

        let mut failure = None;
        if let Some(mut callback) = callback {
            if let Err(err) = guarded(|| {
                callback(&event, self);
                Ok(())
            }) {
                log::warn!("on_finished callback of audio object {} failed: {}", id, err);
                failure = Some(err);
            }
            if !removed {
                if let Ok(mut object) = self.lend(id) {
                    if object.on_finished.is_none() {
                        object.on_finished = Some(callback);
                    }
                    self.restore(object);
                }
            }
        }
        drop(retired);
        (event, failure)
    }

    fn lend(&self, id: ObjectId) -> Result<AudioObject, EngineError> {
        let current = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let index = state
                .position(id)
                .filter(|&index| !state.slots[index].destroy_requested)
                .ok_or(EngineError::ObjectNotFound(id))?;
            let slot = &mut state.slots[index];
            if let Some(object) = slot.object.take() {
                slot.lent_to = Some(current);
                return Ok(object);
            }
            if slot.lent_to == Some(current) {
                return Err(EngineError::ObjectInUse(id));
            }
            self.returned.wait(&mut state);
        }
    }

    fn restore(&self, object: AudioObject) {
        let dropped = {
            let mut state = self.state.lock();
            match state.position(object.id()) {
                Some(index) if state.slots[index].destroy_requested => {
                    state.slots.remove(index);
                    Some(object)
                }
                Some(index) => {
                    let slot = &mut state.slots[index];
                    if slot.name != object.name {
                        slot.name = object.name.clone();
                    }
                    slot.object = Some(object);
                    slot.lent_to = None;
                    None
                }
                None => Some(object),
            }
        };
        self.returned.notify_all();
        drop(dropped);
    }

    fn remove_slot(&self, id: ObjectId) {
        let removed = {
            let mut state = self.state.lock();
            state.position(id).map(|index| state.slots.remove(index))
        };
        self.returned.notify_all();
        drop(removed);
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Puts a lent object back when dropped, including on unwind.
struct Lease<'a> {
    registry: &'a ObjectRegistry,
    object: Option<AudioObject>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.registry.restore(object);
        }
    }
}

fn category_gain(categories: &HashMap<String, f32>, names: &[String]) -> f32 {
    names
        .iter()
        .filter_map(|name| categories.get(name))
        .product()
}

fn check_volume(volume: f32) -> Result<(), EngineError> {
    if volume.is_finite() && volume >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::Configuration(format!("invalid volume {}", volume)))
    }
}

/// Add `chunk * weight` into `output`, frame by frame.
///
/// Mono chunks feed every output channel; otherwise channels beyond the
/// chunk's count are left alone.
fn accumulate(output: &mut SampleBuffer, chunk: &SampleBuffer, weight: f32) {
    let frames = output.frame_count().min(chunk.frame_count());
    let out_channels = output.channel_count();
    let src_channels = chunk.channel_count();
    if src_channels == 0 {
        return;
    }
    let source = chunk.samples();
    let out = output.samples_mut();
    for frame in 0..frames {
        for channel in 0..out_channels {
            let source_channel = if src_channels == 1 {
                0
            } else if channel < src_channels {
                channel
            } else {
                break;
            };
            out[frame * out_channels + channel] += source[frame * src_channels + source_channel] * weight;
        }
    }
}

/// Run user code, turning a panic into an error.
fn guarded<T>(f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(EngineError::Configuration(format!(
            "callback panicked: {}",
            panic_message(payload)
        ))),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
