mod backend;
pub mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ReplayBackend, StubBackend};
pub use result::{
    BoundingBox, Detection, DetectionBatch, ObjectClass, COCO_BACKPACK, COCO_HANDBAG, COCO_KNIFE,
    COCO_PERSON, COCO_SUITCASE, DETECTION_ROW_LEN, TRACKED_CLASS_IDS,
};
