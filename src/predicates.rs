//! Stateless geometric and colour tests used by the event rules.

use crate::detect::BoundingBox;
use crate::frame::{Frame, Roi};
use crate::Point;

/// A box wider than `ratio` times its height is a person lying down.
pub fn is_fallen(bbox: &BoundingBox, ratio: f32) -> bool {
    bbox.width() > bbox.height() * ratio
}

/// Strict point-in-polygon test. Points on an edge or vertex are outside.
///
/// Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if on_segment(point, a, b) {
            return false;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    const EPS: f32 = 1e-4;
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EPS * (1.0 + a.distance(b)) {
        return false;
    }
    p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}

/// True when `a` and `b` are closer than `radius`.
pub fn within_radius(a: Point, b: Point, radius: f32) -> bool {
    a.distance(b) < radius
}

/// True when `object` lies strictly inside the box `center ± (half_width, half_height)`.
pub fn within_reach(center: Point, object: Point, half_width: f32, half_height: f32) -> bool {
    center.x - half_width < object.x
        && object.x < center.x + half_width
        && center.y - half_height < object.y
        && object.y < center.y + half_height
}

/// Inclusive HSV band in the 8-bit convention (H in 0..180, S and V in 0..=255).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    /// Flame-coloured band: reds through yellows, saturated and bright.
    pub const FIRE: HsvRange = HsvRange {
        lower: [0, 120, 120],
        upper: [40, 255, 255],
    };

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }
}

/// Convert one BGR pixel to 8-bit HSV (H halved into 0..180).
pub fn bgr_to_hsv([b, g, r]: [u8; 3]) -> [u8; 3] {
    let (bf, gf, rf) = (f32::from(b), f32::from(g), f32::from(r));
    let v = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = v - min;
    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / delta
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }
    let h = (h / 2.0).round();
    [
        if h >= 180.0 { 0 } else { h as u8 },
        s.round() as u8,
        v as u8,
    ]
}

/// Fraction of pixels inside `roi` whose colour falls within `range`.
///
/// Returns `None` when the region does not overlap the frame.
pub fn color_ratio(frame: &Frame, roi: Roi, range: &HsvRange) -> Option<f32> {
    let roi = roi.clamp_to(frame.width, frame.height)?;
    let matching = frame
        .roi_pixels(roi)
        .filter(|&bgr| range.contains(bgr_to_hsv(bgr)))
        .count();
    Some(matching as f32 / roi.area() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_zone() -> Vec<Point> {
        vec![
            Point::new(10.0, 10.0),
            Point::new(100.0, 10.0),
            Point::new(100.0, 100.0),
            Point::new(10.0, 100.0),
        ]
    }

    #[test]
    fn wide_boxes_are_falls() {
        assert!(is_fallen(&BoundingBox::new(100.0, 100.0, 300.0, 150.0), 1.5));
        assert!(!is_fallen(&BoundingBox::new(100.0, 100.0, 150.0, 300.0), 1.5));
    }

    #[test]
    fn fall_threshold_is_exclusive() {
        // w = 150, h = 100: exactly 1.5x is not a fall
        assert!(!is_fallen(&BoundingBox::new(0.0, 0.0, 150.0, 100.0), 1.5));
        assert!(is_fallen(&BoundingBox::new(0.0, 0.0, 151.0, 100.0), 1.5));
    }

    #[test]
    fn point_in_square_zone() {
        let zone = square_zone();
        assert!(point_in_polygon(Point::new(50.0, 50.0), &zone));
        assert!(!point_in_polygon(Point::new(200.0, 200.0), &zone));
    }

    #[test]
    fn zone_boundary_is_outside() {
        let zone = square_zone();
        assert!(!point_in_polygon(Point::new(10.0, 50.0), &zone));
        assert!(!point_in_polygon(Point::new(50.0, 100.0), &zone));
        assert!(!point_in_polygon(Point::new(100.0, 100.0), &zone));
        assert!(point_in_polygon(Point::new(10.5, 50.0), &zone));
    }

    #[test]
    fn concave_zone() {
        let zone = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(50.0, 50.0),
            Point::new(0.0, 100.0),
        ];
        assert!(point_in_polygon(Point::new(50.0, 25.0), &zone));
        assert!(!point_in_polygon(Point::new(50.0, 75.0), &zone));
    }

    #[test]
    fn degenerate_zone_contains_nothing() {
        let zone = vec![Point::new(0.0, 0.0), Point::new(100.0, 100.0)];
        assert!(!point_in_polygon(Point::new(50.0, 50.0), &zone));
    }

    #[test]
    fn radius_is_exclusive() {
        assert!(within_radius(Point::new(0.0, 0.0), Point::new(149.0, 0.0), 150.0));
        assert!(!within_radius(Point::new(0.0, 0.0), Point::new(150.0, 0.0), 150.0));
    }

    #[test]
    fn reach_box_is_asymmetric() {
        let person = Point::new(200.0, 200.0);
        assert!(within_reach(person, Point::new(270.0, 340.0), 75.0, 150.0));
        assert!(!within_reach(person, Point::new(280.0, 200.0), 75.0, 150.0));
        assert!(!within_reach(person, Point::new(200.0, 350.0), 75.0, 150.0));
    }

    #[test]
    fn hsv_conversion_matches_8bit_convention() {
        assert_eq!(bgr_to_hsv([0, 0, 255]), [0, 255, 255]);
        assert_eq!(bgr_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(bgr_to_hsv([255, 0, 0]), [120, 255, 255]);
        assert_eq!(bgr_to_hsv([0, 165, 255]), [19, 255, 255]);
        assert_eq!(bgr_to_hsv([128, 128, 128]), [0, 0, 128]);
    }

    #[test]
    fn fire_band() {
        assert!(HsvRange::FIRE.contains(bgr_to_hsv([0, 165, 255])));
        assert!(!HsvRange::FIRE.contains(bgr_to_hsv([255, 0, 0])));
        assert!(!HsvRange::FIRE.contains(bgr_to_hsv([60, 60, 80])));
    }

    #[test]
    fn color_ratio_over_roi() {
        let mut frame = Frame::blank(100, 100, 0);
        frame.fill(Roi::new(0, 0, 100, 20), [0, 165, 255]);
        let ratio = color_ratio(&frame, Roi::full(100, 100), &HsvRange::FIRE).unwrap();
        assert!((ratio - 0.2).abs() < 1e-6);
        let ratio = color_ratio(&frame, Roi::new(0, 0, 100, 10), &HsvRange::FIRE).unwrap();
        assert!((ratio - 1.0).abs() < 1e-6);
        assert!(color_ratio(&frame, Roi::new(200, 200, 300, 300), &HsvRange::FIRE).is_none());
    }
}
