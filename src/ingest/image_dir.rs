//! Local image-sequence source.
//!
//! Plays a directory of JPEG/PNG stills in file-name order, or a single still as a
//! one-frame sequence. The source is file-backed: an unreadable still ends the stream
//! instead of failing the unit. Frames are paced (10 fps unless `with_fps` says
//! otherwise) so a looping sequence plays in real time.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use super::{FramePacer, FrameSource, SourceStats};
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const DEFAULT_SEQUENCE_FPS: u32 = 10;

pub struct ImageSequenceSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    pacer: FramePacer,
    stats: SourceStats,
}

impl ImageSequenceSource {
    pub fn open(path: &Path) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files = Vec::new();
            let entries = std::fs::read_dir(path)
                .map_err(|e| anyhow!("failed to list {}: {}", path.display(), e))?;
            for entry in entries {
                let file = entry?.path();
                if file.is_file() && has_image_extension(&file) {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else if path.is_file() && has_image_extension(path) {
            vec![path.to_path_buf()]
        } else {
            return Err(anyhow!(
                "{} is neither an image directory nor a JPEG/PNG file",
                path.display()
            ));
        };
        if files.is_empty() {
            return Err(anyhow!("no JPEG/PNG frames found in {}", path.display()));
        }
        Ok(Self {
            root: path.to_path_buf(),
            files,
            cursor: 0,
            pacer: FramePacer::new(DEFAULT_SEQUENCE_FPS),
            stats: SourceStats::default(),
        })
    }

    /// Play at `fps` frames per second; 0 plays as fast as frames decode.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.pacer = FramePacer::new(fps);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "ImageSequenceSource: {} frame(s) from {}",
            self.files.len(),
            self.root.display()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(file) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;
        self.pacer.pace();
        match image::open(file) {
            Ok(decoded) => {
                self.stats.frames_captured += 1;
                Ok(Some(Frame::from_rgb(&decoded.to_rgb8(), index)))
            }
            Err(e) => {
                self.stats.read_failures += 1;
                log::warn!("ImageSequenceSource: cannot read {}: {}", file.display(), e);
                self.cursor = self.files.len();
                Ok(None)
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
