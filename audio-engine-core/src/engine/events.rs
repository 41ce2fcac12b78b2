use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::engine_delegate::EngineDelegate;

/// Handle returned by [`Engine::subscribe`](super::Engine::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Subscribers of one engine instance.
///
/// Notification clones the subscriber list first, so delegates run without
/// any engine lock held and may subscribe or unsubscribe re-entrantly.
pub(crate) struct DelegateList {
    next_id: AtomicU64,
    delegates: RwLock<Vec<(SubscriptionId, Arc<dyn EngineDelegate>)>>,
}

impl DelegateList {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            delegates: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, delegate: Arc<dyn EngineDelegate>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.delegates.write().push((id, delegate));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut delegates = self.delegates.write();
        let before = delegates.len();
        delegates.retain(|(existing, _)| *existing != id);
        delegates.len() != before
    }

    /// Call `notify` on every subscriber in subscription order.
    ///
    /// A panicking delegate is logged and skipped; it does not take down the
    /// engine thread that raised the event.
    pub fn emit(&self, event: &str, notify: impl Fn(&dyn EngineDelegate)) {
        let snapshot: Vec<Arc<dyn EngineDelegate>> =
            self.delegates.read().iter().map(|(_, d)| Arc::clone(d)).collect();
        for delegate in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| notify(delegate.as_ref()))).is_err() {
                log::error!("Engine delegate panicked while handling {}", event);
            }
        }
    }
}
