use crate::Point;

/// COCO class ids the upstream detector is asked to emit.
pub const COCO_PERSON: u32 = 0;
pub const COCO_BACKPACK: u32 = 24;
pub const COCO_HANDBAG: u32 = 26;
pub const COCO_SUITCASE: u32 = 28;
pub const COCO_KNIFE: u32 = 43;

/// Class whitelist passed to the detector/tracker.
pub const TRACKED_CLASS_IDS: &[u32] = &[
    COCO_PERSON,
    COCO_BACKPACK,
    COCO_HANDBAG,
    COCO_SUITCASE,
    COCO_KNIFE,
];

/// Columns in one raw detection row: x1, y1, x2, y2, track_id, confidence, class_id.
pub const DETECTION_ROW_LEN: usize = 7;

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Person,
    Bag,
    Weapon,
    Other,
}

impl ObjectClass {
    pub fn from_class_id(class_id: u32) -> Self {
        match class_id {
            COCO_PERSON => ObjectClass::Person,
            COCO_BACKPACK | COCO_HANDBAG | COCO_SUITCASE => ObjectClass::Bag,
            COCO_KNIFE => ObjectClass::Weapon,
            _ => ObjectClass::Other,
        }
    }
}

/// Axis-aligned box in frame pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn as_pixels(&self) -> [i32; 4] {
        [
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        ]
    }

    fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// One observed object in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Tracker identity; `None` for a fresh, untracked detection.
    pub track_id: Option<u32>,
    pub class: ObjectClass,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, track_id: Option<u32>, class: ObjectClass, confidence: f32) -> Self {
        Self {
            bbox,
            track_id,
            class,
            confidence,
        }
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }

    /// Parse one raw row. Returns `None` when the row cannot describe a detection.
    fn from_row(row: &[f32]) -> Option<Self> {
        if row.len() < DETECTION_ROW_LEN {
            return None;
        }
        let bbox = BoundingBox::new(row[0], row[1], row[2], row[3]);
        if !bbox.is_finite() || !row[5].is_finite() || !row[6].is_finite() || row[6] < 0.0 {
            return None;
        }
        let track_id = (row[4].is_finite() && row[4] >= 0.0).then(|| row[4] as u32);
        Some(Self {
            bbox,
            track_id,
            class: ObjectClass::from_class_id(row[6] as u32),
            confidence: row[5].clamp(0.0, 1.0),
        })
    }
}

/// All detections of a single frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a batch from raw tracker rows.
    ///
    /// A batch where any row lacks the tracker-id column (fewer than seven values) is
    /// treated as malformed and yields an empty batch. Individual rows with non-finite
    /// values are dropped.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Self {
        if rows
            .iter()
            .any(|row| row.as_ref().len() < DETECTION_ROW_LEN)
        {
            log::debug!("detection batch missing tracker columns; ignoring frame");
            return Self::empty();
        }
        let detections: Vec<Detection> = rows
            .iter()
            .filter_map(|row| Detection::from_row(row.as_ref()))
            .collect();
        if detections.len() != rows.len() {
            log::debug!(
                "dropped {} malformed detection row(s)",
                rows.len() - detections.len()
            );
        }
        Self { detections }
    }

    /// Drop detections below `min_confidence`.
    pub fn retain_confident(mut self, min_confidence: f32) -> Self {
        self.detections
            .retain(|det| det.confidence >= min_confidence);
        self
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    pub fn of_class(&self, class: ObjectClass) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(move |det| det.class == class)
    }

    pub fn persons(&self) -> impl Iterator<Item = &Detection> {
        self.of_class(ObjectClass::Person)
    }

    pub fn bags(&self) -> impl Iterator<Item = &Detection> {
        self.of_class(ObjectClass::Bag)
    }

    pub fn weapons(&self) -> impl Iterator<Item = &Detection> {
        self.of_class(ObjectClass::Weapon)
    }
}
