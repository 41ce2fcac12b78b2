/// Lifecycle of one engine stream (render or capture).
///
/// ```text
/// uninitialized → active ⇄ stopped
/// ```
/// Re-initializing an active stream stops it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Active,
    Stopped,
}

impl StreamState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::Uninitialized
    }
}
