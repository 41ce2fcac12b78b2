//! # audio-engine-core
//!
//! Platform-agnostic core of a real-time audio engine.
//!
//! Owns the lifecycle of audio output and input streams, mixes any number of
//! concurrently playing audio objects into one device-format stream, delivers
//! captured audio to subscribers, and follows devices as they come and go.
//! Platform backends implement the [`AudioBackend`] trait and plug into the
//! generic [`Engine`].
//!
//! ## Architecture
//!
//! ```text
//! audio-engine-core (this crate)
//! ├── traits/       ← AudioBackend, AudioCodec, AudioTransform, EngineDelegate
//! ├── models/       ← EngineError, AudioFormat, SampleBuffer, AudioDevice, EngineConfig, etc.
//! ├── processing/   ← resampling / rematrixing, PCM sample coding, WAV headers
//! ├── mixing/       ← AudioObject, ObjectRegistry (mixing scheduler), chunk producers, AudioPlaylist
//! ├── engine/       ← Engine facade, render/capture threads, device watchdog
//! └── storage/      ← WavCodec, checksummed file writer
//! ```
//!
//! ## Threads
//!
//! An engine runs up to three threads of its own: the render thread (mixes
//! and writes to the backend), the capture thread (reads from the backend and
//! notifies subscribers) and the device watchdog (polls the device list and
//! fails streams over to the new default device when their device vanishes).
//! Stopping is cooperative: the stream's generation is retired and the
//! thread joined.

pub mod engine;
pub mod mixing;
pub mod models;
pub mod processing;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use engine::events::SubscriptionId;
pub use engine::watchdog::{diff_devices, DeviceDiff};
pub use engine::Engine;
pub use mixing::object::{AudioObject, ChunkProducer, FinishedPlaying, RenderRequest, RenderedChunk};
pub use mixing::playlist::{AudioPlaylist, TrackLoader, TransitionEffect};
pub use mixing::producers::MatchFormatProducer;
pub use mixing::registry::{MixOutput, ObjectRegistry};
pub use models::buffer::SampleBuffer;
pub use models::config::EngineConfig;
pub use models::device::{AudioDevice, DeviceRole};
pub use models::diagnostics::EngineDiagnostics;
pub use models::error::EngineError;
pub use models::format::{AudioFormat, ChannelLayout, SampleEncoding};
pub use models::object_id::ObjectId;
pub use models::state::StreamState;
pub use processing::convert::{ChannelMapper, SampleRateConverter};
pub use storage::file_writer::SavedFile;
pub use storage::wav_codec::WavCodec;
pub use traits::backend::{AudioBackend, BackendTuning, OpenedStream};
pub use traits::codec::{AudioCodec, DecodedAudio};
pub use traits::engine_delegate::EngineDelegate;
pub use traits::transform::AudioTransform;
