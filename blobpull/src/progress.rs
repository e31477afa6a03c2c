//! Progress reporting boundary.
//!
//! Rendering is left to [`ProgressSink`] implementors. Events of different items may interleave in any order,
//! and a status may be set more than once to the same value.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::Status;

/// How progress of an item can be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Percentage of a known total size.
    Percentage(u64),
    /// Accumulated bytes, the total size is unknown.
    Bytes,
}

impl ProgressMode {
    #[inline]
    pub fn new(size_bytes: Option<u64>) -> Self {
        size_bytes.map_or(Self::Bytes, Self::Percentage)
    }
}

/// Consumer of per-item progress events.
pub trait ProgressSink: Send + Sync {
    /// Announce an item about to be fetched.
    fn register(&self, id: &str, name: &str, mode: ProgressMode);

    /// Set the status of an item.
    fn set_status(&self, id: &str, status: Status);

    /// Add `bytes` to the received bytes of an item.
    fn increment(&self, id: &str, bytes: u64);
}

/// Sink discarding every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn register(&self, _: &str, _: &str, _: ProgressMode) {}

    fn set_status(&self, _: &str, _: Status) {}

    fn increment(&self, _: &str, _: u64) {}
}

#[derive(Debug)]
struct Item {
    name: String,
    mode: ProgressMode,
    status: Status,
    received: u64,
}

/// Sink logging status changes through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgress {
    items: RwLock<HashMap<String, Item>>,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received so far by an item.
    pub fn received(&self, id: &str) -> Option<u64> {
        self.items.read().ok()?.get(id).map(|item| item.received)
    }
}

impl ProgressSink for LogProgress {
    fn register(&self, id: &str, name: &str, mode: ProgressMode) {
        if let Ok(mut items) = self.items.write() {
            items.insert(
                id.to_owned(),
                Item {
                    name: name.to_owned(),
                    mode,
                    status: Status::Waiting,
                    received: 0,
                },
            );
        }
    }

    fn set_status(&self, id: &str, status: Status) {
        let Ok(mut items) = self.items.write() else {
            return;
        };
        let Some(item) = items.get_mut(id) else {
            return;
        };

        if item.status == status {
            return;
        }

        item.status = status;

        match item.mode {
            ProgressMode::Percentage(total) if total > 0 => {
                let pct = item.received.saturating_mul(100) / total;
                tracing::info!("{}: {status} ({} / {total} bytes, {pct}%)", item.name, item.received);
            }
            _ => tracing::info!("{}: {status} ({} bytes)", item.name, item.received),
        }
    }

    fn increment(&self, id: &str, bytes: u64) {
        if let Ok(mut items) = self.items.write() {
            if let Some(item) = items.get_mut(id) {
                item.received = item.received.saturating_add(bytes);
            }
        }
    }
}
