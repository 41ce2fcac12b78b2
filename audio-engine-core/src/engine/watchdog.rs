//! Device hot-plug detection and fail-over.
//!
//! A dedicated thread re-enumerates devices every enumeration period and
//! diffs the result against the previous snapshot by device id.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::device::{find_default, AudioDevice, DeviceRole};
use crate::models::diagnostics::DiagnosticsCounters;

use super::streams::StreamKind;
use super::EngineShared;

/// Longest single sleep, so shutdown is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Difference between two enumerations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiff {
    /// In the order of the new list.
    pub added: Vec<AudioDevice>,
    /// In the order of the old list.
    pub removed: Vec<AudioDevice>,
    /// Roles whose default device id changed, with the new default.
    pub default_changed: Vec<(DeviceRole, Option<AudioDevice>)>,
}

impl DeviceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.default_changed.is_empty()
    }

    fn default_changed_for(&self, role: DeviceRole) -> bool {
        self.default_changed.iter().any(|(changed, _)| *changed == role)
    }
}

/// Compare two enumerations by device id.
pub fn diff_devices(old: &[AudioDevice], new: &[AudioDevice]) -> DeviceDiff {
    let added = new
        .iter()
        .filter(|device| !old.iter().any(|o| o.is_same(device)))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|device| !new.iter().any(|n| n.is_same(device)))
        .cloned()
        .collect();

    let mut default_changed = Vec::new();
    for role in [DeviceRole::Render, DeviceRole::Capture] {
        let before = find_default(old, role).map(|d| d.id.as_str());
        let after = find_default(new, role);
        if before != after.map(|d| d.id.as_str()) {
            default_changed.push((role, after.cloned()));
        }
    }

    DeviceDiff {
        added,
        removed,
        default_changed,
    }
}

pub(crate) fn watchdog_loop(shared: Arc<EngineShared>) {
    log::debug!("Device watchdog started");
    let mut last_poll = Instant::now();
    while !shared.is_disposing() {
        let period = shared.enumeration_period();
        let elapsed = last_poll.elapsed();
        if elapsed < period {
            thread::sleep((period - elapsed).min(SLEEP_SLICE));
            continue;
        }
        last_poll = Instant::now();
        poll_once(&shared);
    }
    log::debug!("Device watchdog exiting");
}

/// One watchdog pass: enumerate, diff, fail over, notify.
///
/// Events are raised as added devices first, then removed devices, then
/// default changes. A bound device that disappeared is replaced before its
/// removal is announced.
pub(crate) fn poll_once(shared: &Arc<EngineShared>) -> Option<DeviceDiff> {
    DiagnosticsCounters::add(&shared.diagnostics.device_polls, 1);
    let current = match shared.backend.enumerate_devices() {
        Ok(devices) => devices,
        Err(e) => {
            // Keep the old snapshot so the next successful poll diffs against it.
            log::error!("Device enumeration on {} failed: {}", shared.backend.name(), e);
            shared.delegates.emit("error", |d| d.on_error(&e));
            return None;
        }
    };

    let previous = std::mem::replace(&mut *shared.devices.lock(), current.clone());
    let diff = diff_devices(&previous, &current);
    if diff.is_empty() {
        log::trace!("Device poll: no changes ({} devices)", current.len());
    }

    for device in &diff.added {
        log::info!("Audio device added: '{}' ({})", device.name, device.id);
        shared.delegates.emit("device added", |d| d.on_device_added(device));
    }

    for device in &diff.removed {
        log::warn!("Audio device removed: '{}' ({})", device.name, device.id);
        for kind in [StreamKind::Render, StreamKind::Capture] {
            if is_bound(shared, kind, device) {
                fail_over(shared, kind);
            }
        }
        shared.delegates.emit("device removed", |d| d.on_device_removed(device));
    }

    for (role, device) in &diff.default_changed {
        log::info!(
            "Default {:?} device changed to {}",
            role,
            device.as_ref().map(|d| d.name.as_str()).unwrap_or("<none>")
        );
        shared
            .delegates
            .emit("default device changed", |d| d.on_default_device_changed(*role, device.as_ref()));
    }

    for kind in [StreamKind::Render, StreamKind::Capture] {
        let pending = shared.stream(kind).failover_pending.load(Ordering::SeqCst);
        if pending && (!diff.added.is_empty() || diff.default_changed_for(kind.role())) {
            log::info!("Retrying {} fail-over", kind);
            fail_over(shared, kind);
        }
    }

    Some(diff)
}

fn is_bound(shared: &EngineShared, kind: StreamKind, device: &AudioDevice) -> bool {
    shared
        .stream(kind)
        .slot
        .lock()
        .device
        .as_ref()
        .is_some_and(|bound| bound.is_same(device))
}

/// Reopen a stream on the system default device with its last format.
fn fail_over(shared: &Arc<EngineShared>, kind: StreamKind) {
    if !shared.config.auto_failover || shared.is_disposing() {
        return;
    }
    let format = shared.stream(kind).slot.lock().format;
    match shared.initialize_stream(kind, None, format) {
        Ok(opened) => {
            DiagnosticsCounters::add(&shared.diagnostics.failovers, 1);
            log::warn!("{} stream failed over to '{}'", kind, opened.device.name);
        }
        Err(e) => {
            shared.stream(kind).failover_pending.store(true, Ordering::SeqCst);
            log::error!("{} fail-over failed: {}", kind, e);
            shared.delegates.emit("error", |d| d.on_error(&e));
        }
    }
}
