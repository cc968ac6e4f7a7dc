use anyhow::Result;

use crate::detect::result::DetectionBatch;
use crate::frame::Frame;

/// Detector/tracker backend trait.
///
/// The backend is the external object-detection and tracking model. It receives one
/// frame at a time and returns boxes with stable track ids. Track identity is the
/// backend's responsibility, so an instance must only ever see frames from one camera.
///
/// Each camera unit owns its own backend instance.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection and tracking on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
