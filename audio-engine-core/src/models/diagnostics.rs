use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Snapshot of engine activity, for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDiagnostics {
    pub started_at: DateTime<Utc>,
    pub render_cycles: u64,
    pub frames_rendered: u64,
    pub capture_chunks: u64,
    pub frames_captured: u64,
    pub device_polls: u64,
    pub failovers: u64,
    pub objects_dropped: u64,
    pub stream_errors: u64,
}

/// Live counters behind [`EngineDiagnostics`], updated from engine threads.
#[derive(Debug)]
pub struct DiagnosticsCounters {
    started_at: DateTime<Utc>,
    pub render_cycles: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub capture_chunks: AtomicU64,
    pub frames_captured: AtomicU64,
    pub device_polls: AtomicU64,
    pub failovers: AtomicU64,
    pub objects_dropped: AtomicU64,
    pub stream_errors: AtomicU64,
}

impl DiagnosticsCounters {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            render_cycles: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            capture_chunks: AtomicU64::new(0),
            frames_captured: AtomicU64::new(0),
            device_polls: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            objects_dropped: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
        }
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineDiagnostics {
        EngineDiagnostics {
            started_at: self.started_at,
            render_cycles: self.render_cycles.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            capture_chunks: self.capture_chunks.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            device_polls: self.device_polls.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            objects_dropped: self.objects_dropped.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for DiagnosticsCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = DiagnosticsCounters::new();
        DiagnosticsCounters::add(&counters.render_cycles, 3);
        DiagnosticsCounters::add(&counters.frames_rendered, 1440);
        let snap = counters.snapshot();
        assert_eq!(snap.render_cycles, 3);
        assert_eq!(snap.frames_rendered, 1440);
        assert_eq!(snap.failovers, 0);
        assert!(snap.started_at <= Utc::now());
    }
}
