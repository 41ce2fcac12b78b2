//! # audio-engine-virtual
//!
//! Simulated-hardware backend for audio-engine-core.
//!
//! Provides:
//! - `VirtualBackend`: an `AudioBackend` over clock-paced virtual streams
//! - `DeviceRegistry`: hot-pluggable render and capture endpoints with per-role defaults
//! - `SignalGenerator`: what the virtual microphone delivers
//!
//! Useful for running the engine without sound hardware and for exercising
//! device hot-plug and fail-over deterministically.
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_engine_core::Engine;
//! use audio_engine_virtual::VirtualBackend;
//!
//! let backend = Arc::new(VirtualBackend::with_default_devices());
//! let engine = Engine::with_defaults(backend.clone())?;
//! engine.initialize_render(None, None)?;
//! backend.unplug("speakers")?;
//! ```

pub mod backend;
pub mod device_registry;
pub mod error;
pub mod signal;

#[cfg(test)]
mod engine_tests;

pub use backend::{BackendOperation, VirtualBackend};
pub use device_registry::{DeviceRegistry, VirtualDevice};
pub use error::{VirtualDeviceError, VIRTUAL_API};
pub use signal::{CaptureSignal, SignalGenerator};
