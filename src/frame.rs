//! Frame container.
//!
//! - `Frame`: one decoded image in BGR byte order (the order capture pipelines hand out).
//! - `Roi`: pixel rectangle used to restrict per-frame checks to part of the image.
//!
//! Frames are owned by the camera unit for the duration of one processing cycle and
//! are never persisted.

use anyhow::{anyhow, Result};

const CHANNELS: usize = 3;

/// One decoded BGR frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Sequence number assigned by the source.
    pub index: u64,
}

// No Clone: frames are large and only ever borrowed downstream.

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer holds {} bytes, {}x{} BGR needs {}",
                data.len(),
                width,
                height,
                expected
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    /// All-black frame.
    pub fn blank(width: u32, height: u32, index: u64) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * CHANNELS],
            width,
            height,
            index,
        }
    }

    /// Convert an RGB image into a BGR frame.
    pub fn from_rgb(image: &image::RgbImage, index: u64) -> Self {
        let mut data = Vec::with_capacity(image.as_raw().len());
        for pixel in image.pixels() {
            let [r, g, b] = pixel.0;
            data.extend_from_slice(&[b, g, r]);
        }
        Self {
            data,
            width: image.width(),
            height: image.height(),
            index,
        }
    }

    /// Raw BGR bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// BGR value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Paint a rectangle (clamped to the frame) with a BGR colour.
    pub fn fill(&mut self, roi: Roi, bgr: [u8; 3]) {
        let Some(roi) = roi.clamp_to(self.width, self.height) else {
            return;
        };
        for y in roi.y1..roi.y2 {
            let row = y as usize * self.width as usize;
            for x in roi.x1..roi.x2 {
                let offset = (row + x as usize) * CHANNELS;
                self.data[offset..offset + CHANNELS].copy_from_slice(&bgr);
            }
        }
    }

    /// Iterate over the BGR pixels inside `roi` (already clamped).
    pub(crate) fn roi_pixels(&self, roi: Roi) -> impl Iterator<Item = [u8; 3]> + '_ {
        let width = self.width as usize;
        (roi.y1..roi.y2).flat_map(move |y| {
            (roi.x1..roi.x2).map(move |x| {
                let offset = (y as usize * width + x as usize) * CHANNELS;
                [
                    self.data[offset],
                    self.data[offset + 1],
                    self.data[offset + 2],
                ]
            })
        })
    }
}

/// Pixel rectangle `[x1, x2) x [y1, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Roi {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Roi {
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Intersect with a `width x height` frame. `None` when nothing is left.
    pub fn clamp_to(self, width: u32, height: u32) -> Option<Roi> {
        let clamped = Roi {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        };
        (clamped.x2 > clamped.x1 && clamped.y2 > clamped.y1).then_some(clamped)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.x2.saturating_sub(self.x1)) * u64::from(self.y2.saturating_sub(self.y1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_size() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 0).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 0).is_ok());
    }

    #[test]
    fn fill_paints_clamped_region() {
        let mut frame = Frame::blank(4, 4, 0);
        frame.fill(Roi::new(2, 2, 10, 10), [1, 2, 3]);
        assert_eq!(frame.pixel(3, 3), Some([1, 2, 3]));
        assert_eq!(frame.pixel(1, 1), Some([0, 0, 0]));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn rgb_images_become_bgr() {
        let mut img = image::RgbImage::new(2, 1);
        img.put_pixel(1, 0, image::Rgb([255, 10, 0]));
        let frame = Frame::from_rgb(&img, 7);
        assert_eq!(frame.index, 7);
        assert_eq!(frame.pixel(1, 0), Some([0, 10, 255]));
    }

    #[test]
    fn roi_clamp_and_area() {
        assert_eq!(Roi::new(0, 0, 1280, 720).clamp_to(640, 480), Some(Roi::full(640, 480)));
        assert_eq!(Roi::new(700, 0, 900, 100).clamp_to(640, 480), None);
        assert_eq!(Roi::new(10, 10, 20, 30).area(), 200);
    }
}
