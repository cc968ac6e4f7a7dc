//! Campus Watchtower
//!
//! This crate implements the event-detection core of a campus camera watchtower.
//!
//! # Architecture
//!
//! Frames flow one way through each camera unit:
//!
//! 1. **Ingest**: a `FrameSource` produces frames (synthetic, image sequences).
//! 2. **Detect**: a `DetectorBackend` (external model, treated as a black box) turns a
//!    frame into a `DetectionBatch` of tracked boxes.
//! 3. **Track + Rules**: the `EventDetector` updates the per-camera `TrackStore` and
//!    evaluates the fall, intrusion, loitering, violence, abandoned-object and fire rules.
//! 4. **Gate**: the `CooldownGate` suppresses repeats of an event kind per camera.
//! 5. **Sinks**: surfaced events go to the structured event log and the alert dispatcher.
//!
//! # Module Structure
//!
//! - `detect`: detection types and detector backends
//! - `frame` / `ingest`: frame container and frame sources
//! - `tracking` / `predicates` / `detector`: stateful rules engine
//! - `cooldown`: per-camera alert debouncing
//! - `storage` / `dispatch` / `health`: outbound collaborators
//! - `stream`: per-camera processing loop
//! - Core types: EventKind, EventDetails, DetectedEvent, EventRecord, Point

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod cooldown;
pub mod detect;
pub mod detector;
pub mod dispatch;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod predicates;
pub mod storage;
pub mod stream;
pub mod tracking;

pub use cooldown::CooldownGate;
pub use detect::{BoundingBox, Detection, DetectionBatch, DetectorBackend, ObjectClass};
pub use detector::{DetectorSettings, EventDetector, FireSettings};
pub use dispatch::{AlertDispatcher, AlertSender, AlertWorker, HttpReflexDispatcher, ReflexAction};
pub use frame::{Frame, Roi};
pub use health::{HealthPing, HealthReporter, HttpHealthPing};
pub use ingest::{open_source, FrameSource};
pub use storage::{EventSink, InMemoryEventLog, SqliteEventLog, StoredEvent};
pub use stream::{CameraUnit, UnitSettings, UnitStats};
pub use tracking::{PersonAlert, TrackStore, TrackedObject, TrackedPerson};

/// Source name used for every record written to the structured event log.
pub const MODULE_NAME: &str = "cv_watchtower";

// -------------------- Geometry --------------------

/// A point in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Truncated integer pixel position, as reported in event details.
    pub fn as_pixels(self) -> [i32; 2] {
        [self.x as i32, self.y as i32]
    }
}

// -------------------- Event Types --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    FallDetected,
    IntrusionDetected,
    LoiteringDetected,
    ViolenceDetected,
    AbandonedObject,
    FireSmokeDetected,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::FallDetected => "FALL_DETECTED",
            EventKind::IntrusionDetected => "INTRUSION_DETECTED",
            EventKind::LoiteringDetected => "LOITERING_DETECTED",
            EventKind::ViolenceDetected => "VIOLENCE_DETECTED",
            EventKind::AbandonedObject => "ABANDONED_OBJECT",
            EventKind::FireSmokeDetected => "FIRE_SMOKE_DETECTED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a violence event fired.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViolenceReason {
    #[serde(rename = "Aggressive Movement")]
    AggressiveMovement,
    #[serde(rename = "Weapon Detected")]
    WeaponDetected,
}

impl ViolenceReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolenceReason::AggressiveMovement => "Aggressive Movement",
            ViolenceReason::WeaponDetected => "Weapon Detected",
        }
    }
}

/// Kind-specific event payload. Serializes as a flat key/value map.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EventDetails {
    Fall {
        bbox: [i32; 4],
        confidence: f32,
    },
    Intrusion {
        position: [i32; 2],
        confidence: f32,
    },
    Loitering {
        track_id: u32,
        /// whole seconds since the track was first seen
        duration: u64,
        confidence: f32,
    },
    Violence {
        track_id: u32,
        reason: ViolenceReason,
        confidence: f32,
    },
    AbandonedObject {
        object_id: String,
        /// whole seconds without a person nearby
        duration: u64,
    },
    FireSmoke {
        pixel_percentage: f32,
    },
}

impl EventDetails {
    pub fn kind(&self) -> EventKind {
        match self {
            EventDetails::Fall { .. } => EventKind::FallDetected,
            EventDetails::Intrusion { .. } => EventKind::IntrusionDetected,
            EventDetails::Loitering { .. } => EventKind::LoiteringDetected,
            EventDetails::Violence { .. } => EventKind::ViolenceDetected,
            EventDetails::AbandonedObject { .. } => EventKind::AbandonedObject,
            EventDetails::FireSmoke { .. } => EventKind::FireSmokeDetected,
        }
    }
}

// -------------------- Events --------------------

/// An event produced by the detector for one frame. Carries no camera or time;
/// those are attached by the camera unit once the event passes the cooldown gate.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedEvent {
    pub kind: EventKind,
    pub details: EventDetails,
}

impl From<EventDetails> for DetectedEvent {
    fn from(details: EventDetails) -> Self {
        Self {
            kind: details.kind(),
            details,
        }
    }
}

/// A surfaced event, as handed to the event log and the alert dispatcher.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EventRecord {
    pub event_type: EventKind,
    pub camera_id: String,
    pub details: EventDetails,
    /// seconds since epoch
    pub timestamp: u64,
}

impl EventRecord {
    pub fn bind(event: DetectedEvent, camera_id: &str, timestamp: u64) -> Self {
        Self {
            event_type: event.kind,
            camera_id: camera_id.to_string(),
            details: event.details,
            timestamp,
        }
    }
}

// -------------------- Helpers --------------------

/// Camera ids appear in log lines, db rows and alert messages, so keep them plain.
///
/// Allowed: "LobbyCam-01", "court_yard", "cam3"
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"));
    if !re.is_match(camera_id) {
        return Err(anyhow!(
            "camera id {:?} must match ^[A-Za-z0-9_-]{{1,64}}$",
            camera_id
        ));
    }
    Ok(())
}

/// Rounds to two decimals, the precision confidences are reported with.
pub(crate) fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serializes_as_wire_name() -> Result<()> {
        for kind in [
            EventKind::FallDetected,
            EventKind::IntrusionDetected,
            EventKind::LoiteringDetected,
            EventKind::ViolenceDetected,
            EventKind::AbandonedObject,
            EventKind::FireSmokeDetected,
        ] {
            let json = serde_json::to_string(&kind)?;
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        Ok(())
    }

    #[test]
    fn details_serialize_as_flat_map() -> Result<()> {
        let details = EventDetails::Violence {
            track_id: 7,
            reason: ViolenceReason::WeaponDetected,
            confidence: 0.81,
        };
        let value = serde_json::to_value(&details)?;
        assert_eq!(value["track_id"], 7);
        assert_eq!(value["reason"], "Weapon Detected");
        assert_eq!(details.kind(), EventKind::ViolenceDetected);
        Ok(())
    }

    #[test]
    fn record_carries_camera_and_timestamp() -> Result<()> {
        let event = DetectedEvent::from(EventDetails::FireSmoke {
            pixel_percentage: 21.5,
        });
        let record = EventRecord::bind(event, "LobbyCam-01", 1_700_000_000);
        let value = serde_json::to_value(&record)?;
        assert_eq!(value["event_type"], "FIRE_SMOKE_DETECTED");
        assert_eq!(value["camera_id"], "LobbyCam-01");
        assert_eq!(value["timestamp"], 1_700_000_000u64);
        assert_eq!(value["details"]["pixel_percentage"], 21.5);
        Ok(())
    }

    #[test]
    fn camera_id_validation() {
        assert!(validate_camera_id("LobbyCam-01").is_ok());
        assert!(validate_camera_id("court_yard").is_ok());
        assert!(validate_camera_id("").is_err());
        assert!(validate_camera_id("lobby cam").is_err());
        assert!(validate_camera_id("cam/1").is_err());
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(0.876), 0.88);
        assert_eq!(round2(0.5), 0.5);
    }
}
