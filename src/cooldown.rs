//! Per-camera alert debouncing.
//!
//! The gate is keyed by `(camera_id, EventKind)` and does not care which track produced
//! the event: after one fall on `LobbyCam-01` surfaces, every other fall on that camera
//! is held back until the window has elapsed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::EventKind;

pub struct CooldownGate {
    window: Duration,
    last_fired: HashMap<(String, EventKind), Instant>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and records `now` when `kind` may surface on `camera_id`.
    ///
    /// Suppressed while less than the window has passed since the last surfaced event
    /// of the same pair. A suppressed call does not extend the window.
    pub fn should_fire(&mut self, camera_id: &str, kind: EventKind, now: Instant) -> bool {
        let key = (camera_id.to_string(), kind);
        if let Some(last) = self.last_fired.get(&key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_fired.insert(key, now);
        true
    }

    /// When `kind` last surfaced on `camera_id`.
    pub fn last_fired(&self, camera_id: &str, kind: EventKind) -> Option<Instant> {
        self.last_fired
            .get(&(camera_id.to_string(), kind))
            .copied()
    }
}
