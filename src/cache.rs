//! Freshest-wins inbound value slot
//!
//! Holds at most one decoded frame. Every arrival overwrites whatever is
//! there; every read consumes it. A consumer polling slower than the arrival
//! rate silently skips intermediate frames, and never sees the same frame
//! twice. This is not a queue.

use parking_lot::Mutex;

/// Single-slot, overwrite-on-write, destructive-read store
#[derive(Debug, Default)]
pub struct LatestValue {
    slot: Mutex<Option<Vec<f64>>>,
}

impl LatestValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, replacing any unread one
    pub fn put(&self, values: Vec<f64>) {
        *self.slot.lock() = Some(values);
    }

    /// Take the newest frame, leaving the slot empty
    pub fn take(&self) -> Option<Vec<f64>> {
        self.slot.lock().take()
    }

    /// Whether an unread frame is waiting
    pub fn has_value(&self) -> bool {
        self.slot.lock().is_some()
    }
}
