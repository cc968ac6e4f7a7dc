//! Replay backend.
//!
//! Plays back detector/tracker output recorded as JSON lines, one line per frame:
//!
//! ```text
//! [[x1, y1, x2, y2, track_id, confidence, class_id], ...]
//! ```
//!
//! A line that does not parse yields an empty batch for that frame. Playback wraps
//! around at the end of the recording.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionBatch;
use crate::frame::Frame;

pub struct ReplayBackend {
    lines: Vec<String>,
    cursor: usize,
}

impl ReplayBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read detections {}: {}", path.display(), e))?;
        Ok(Self::from_lines(raw.lines().map(str::to_string).collect()))
    }

    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn next_line(&mut self) -> Option<&str> {
        if self.lines.is_empty() {
            return None;
        }
        let idx = self.cursor % self.lines.len();
        self.cursor = self.cursor.wrapping_add(1);
        self.lines.get(idx).map(String::as_str)
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionBatch> {
        let Some(line) = self.next_line() else {
            return Ok(DetectionBatch::empty());
        };
        let line = line.trim();
        if line.is_empty() {
            return Ok(DetectionBatch::empty());
        }
        match serde_json::from_str::<Vec<Vec<f32>>>(line) {
            Ok(rows) => Ok(DetectionBatch::from_rows(&rows)),
            Err(e) => {
                log::debug!("replay: unparsable detection line: {}", e);
                Ok(DetectionBatch::empty())
            }
        }
    }
}
