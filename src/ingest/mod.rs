//! Frame ingestion sources.
//!
//! This module provides the sources a camera unit can pull frames from:
//! - Synthetic `stub://` sources (demos and tests)
//! - Local image sequences (a directory of JPEG/PNG stills, or a single still)
//!
//! Sources come in two flavours. *Live* sources never end; a failed read is
//! transient and the unit retries. *File-backed* sources end: `next_frame` returns
//! `Ok(None)` at end of stream (and on unreadable input), after which the unit either
//! rewinds or stops.
//!
//! Capture devices and network streams need a decoding backend that is not part of
//! this crate; `open_source` rejects them with an error naming the camera source.

mod image_dir;
mod synthetic;

pub use image_dir::ImageSequenceSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::CameraSource;
use crate::frame::Frame;

pub trait FrameSource: Send {
    /// Open the underlying stream. Called once before the first frame.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `Ok(None)` at end of stream.
    ///
    /// Live sources never return `Ok(None)`; their errors are transient.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Restart a file-backed source from its first frame.
    fn rewind(&mut self) -> Result<()>;

    fn is_live(&self) -> bool;

    /// Locator used in log lines.
    fn describe(&self) -> String;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
}

/// Holds a source to a fixed frame rate. `fps == 0` disables pacing.
#[derive(Clone, Debug)]
pub(crate) struct FramePacer {
    interval: Option<Duration>,
    next_deadline: Option<Instant>,
}

impl FramePacer {
    pub(crate) fn new(fps: u32) -> Self {
        Self {
            interval: (fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(fps))),
            next_deadline: None,
        }
    }

    /// Sleep until the next frame is due. The first call returns immediately.
    pub(crate) fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + interval);
    }
}

/// Open the source configured for a camera.
///
/// `width`/`height` size synthetic frames; image sequences keep their own size.
/// An image sequence locator may end in `?fps=N` (default 10, 0 = unpaced).
pub fn open_source(source: &CameraSource, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    match source {
        CameraSource::Device(index) => Err(anyhow!(
            "capture device {} requires an external capture backend",
            index
        )),
        CameraSource::Path(locator) if locator.starts_with("stub://") => {
            Ok(Box::new(SyntheticSource::parse(locator, width, height)?))
        }
        CameraSource::Path(locator) if locator.contains("://") => Err(anyhow!(
            "stream {} requires an external capture backend",
            locator
        )),
        CameraSource::Path(locator) => {
            let (path, fps) = match locator.rsplit_once("?fps=") {
                Some((path, fps)) => {
                    let fps = fps
                        .parse::<u32>()
                        .map_err(|_| anyhow!("invalid fps {:?} in {}", fps, locator))?;
                    (path, Some(fps))
                }
                None => (locator.as_str(), None),
            };
            let mut sequence = ImageSequenceSource::open(Path::new(path))?;
            if let Some(fps) = fps {
                sequence = sequence.with_fps(fps);
            }
            Ok(Box::new(sequence))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_and_network_sources_are_rejected() {
        let err = open_source(&CameraSource::Device(0), 64, 48).err().unwrap();
        assert!(err.to_string().contains("capture device 0"));
        assert!(open_source(&CameraSource::Path("rtsp://10.0.0.2/live".into()), 64, 48).is_err());
    }

    #[test]
    fn stub_locator_opens_synthetic_source() -> Result<()> {
        let mut source = open_source(&CameraSource::Path("stub://gate?frames=2".into()), 64, 48)?;
        source.connect()?;
        assert!(!source.is_live());
        assert_eq!(source.describe(), "stub://gate?frames=2");
        let frame = source.next_frame()?.unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        Ok(())
    }

    #[test]
    fn image_sequence_locator_takes_fps_suffix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9])).save(dir.path().join("a.png"))?;
        let locator = format!("{}?fps=0", dir.path().display());
        let mut source = open_source(&CameraSource::Path(locator), 64, 48)?;
        assert!(source.next_frame()?.is_some());

        let bad = format!("{}?fps=fast", dir.path().display());
        assert!(open_source(&CameraSource::Path(bad), 64, 48).is_err());
        Ok(())
    }

    #[test]
    fn pacer_spaces_frames() {
        let mut pacer = FramePacer::new(50);
        let started = Instant::now();
        for _ in 0..3 {
            pacer.pace();
        }
        assert!(started.elapsed() >= Duration::from_millis(40));

        let mut unpaced = FramePacer::new(0);
        let started = Instant::now();
        for _ in 0..100 {
            unpaced.pace();
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(open_source(&CameraSource::Path("/nonexistent/frames".into()), 64, 48).is_err());
    }
}
