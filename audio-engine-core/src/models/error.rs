use thiserror::Error;

use super::object_id::ObjectId;

/// Errors produced by the audio engine and by backends implementing
/// [`AudioBackend`](crate::traits::backend::AudioBackend).
///
/// Every variant carries owned data so errors can be cloned into event
/// notifications raised on engine threads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Invalid argument or state; the operation had no effect.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure reported by a native audio API.
    #[error("{api} failed with code {code}: {message}")]
    Device {
        code: i32,
        api: String,
        message: String,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("audio object {0} not found")]
    ObjectNotFound(ObjectId),

    /// The object is being rendered further up the calling thread's stack.
    #[error("audio object {0} is in use by the mixer")]
    ObjectInUse(ObjectId),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("engine is shutting down")]
    Disposed,
}

impl EngineError {
    /// Shorthand for a native API failure.
    pub fn device(code: i32, api: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            code,
            api: api.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the native layer rather than from the caller.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}
