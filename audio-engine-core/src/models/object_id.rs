use std::fmt;

use uuid::Uuid;

/// Stable handle to an audio object owned by the engine's registry.
///
/// Ids are random v4 UUIDs, so a handle is never reused by a later object and
/// stays meaningful after its object has been removed: lookups simply report
/// [`EngineError::ObjectNotFound`](super::error::EngineError::ObjectNotFound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
