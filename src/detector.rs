//! Event rules.
//!
//! `EventDetector::process` turns one frame's detections into zero or more events,
//! using the camera's `TrackStore` for everything that spans frames. Rules run in a
//! fixed order: fire (once per frame), abandoned objects (once per frame), then per
//! person: fall, intrusion, loitering, violence.

use std::time::{Duration, Instant};

use crate::detect::{Detection, DetectionBatch};
use crate::frame::{Frame, Roi};
use crate::predicates::{self, HsvRange};
use crate::tracking::{object_key, PersonAlert, TrackStore};
use crate::{round2, DetectedEvent, EventDetails, Point, ViolenceReason};

#[derive(Clone, Debug, PartialEq)]
pub struct FireSettings {
    /// Region checked for flame colours. Clamped to the frame.
    pub roi: Roi,
    /// Matching-pixel fraction above which the frame counts as on fire.
    pub threshold: f32,
    pub color: HsvRange,
}

impl Default for FireSettings {
    fn default() -> Self {
        Self {
            roi: Roi::full(1280, 720),
            threshold: 0.15,
            color: HsvRange::FIRE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// width > ratio * height means fallen
    pub fall_ratio: f32,
    /// Restricted area; persons whose centroid is strictly inside are intruders.
    pub intrusion_zone: Vec<Point>,
    pub loitering_duration: Duration,
    /// Maximum drift from the first recorded position that still counts as loitering.
    pub loitering_distance: f32,
    pub abandoned_duration: Duration,
    /// A person closer than this to a bag is attending it.
    pub attendance_radius: f32,
    /// Mean per-frame displacement above which movement is aggressive.
    pub speed_threshold: f32,
    pub min_velocity_samples: usize,
    /// Half extents of the box around a person in which a weapon counts as held.
    pub weapon_reach: (f32, f32),
    pub fire: FireSettings,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            fall_ratio: 1.5,
            intrusion_zone: vec![
                Point::new(50.0, 600.0),
                Point::new(300.0, 600.0),
                Point::new(300.0, 700.0),
                Point::new(50.0, 700.0),
            ],
            loitering_duration: Duration::from_secs(10),
            loitering_distance: 50.0,
            abandoned_duration: Duration::from_secs(30),
            attendance_radius: 150.0,
            speed_threshold: 150.0,
            min_velocity_samples: 4,
            weapon_reach: (75.0, 150.0),
            fire: FireSettings::default(),
        }
    }
}

pub struct EventDetector {
    settings: DetectorSettings,
}

impl EventDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Evaluate all rules for one frame.
    ///
    /// An empty batch produces no events, including no fire check.
    pub fn process(
        &self,
        batch: &DetectionBatch,
        store: &mut TrackStore,
        frame: &Frame,
        now: Instant,
    ) -> Vec<DetectedEvent> {
        if batch.is_empty() {
            return Vec::new();
        }
        let mut events = Vec::new();

        if let Some(details) = self.check_fire(frame) {
            events.push(details.into());
        }

        let persons: Vec<&Detection> = batch.persons().collect();
        let weapons: Vec<&Detection> = batch.weapons().collect();

        self.check_abandoned(batch, &persons, store, now, &mut events);

        for person in &persons {
            if let Some(details) = self.check_fall(person) {
                events.push(details.into());
            }
            if let Some(details) = self.check_intrusion(person) {
                events.push(details.into());
            }
            let Some(track_id) = person.track_id else {
                continue;
            };
            store.update_person(track_id, person.centroid(), now);
            if let Some(details) = self.check_loitering(track_id, person, store, now) {
                events.push(details.into());
            }
            if let Some(details) = self.check_violence(track_id, person, &weapons, store) {
                events.push(details.into());
            }
        }

        events
    }

    fn check_fire(&self, frame: &Frame) -> Option<EventDetails> {
        let fire = &self.settings.fire;
        let ratio = predicates::color_ratio(frame, fire.roi, &fire.color)?;
        (ratio > fire.threshold).then(|| EventDetails::FireSmoke {
            pixel_percentage: round2(ratio * 100.0),
        })
    }

    fn check_abandoned(
        &self,
        batch: &DetectionBatch,
        persons: &[&Detection],
        store: &mut TrackStore,
        now: Instant,
        events: &mut Vec<DetectedEvent>,
    ) {
        for bag in batch.bags() {
            if let Some(track_id) = bag.track_id {
                store.update_object(&object_key(track_id), bag.centroid(), now);
            }
        }

        // bags hidden this frame keep their last centroid and are still checked
        let radius = self.settings.attendance_radius;
        for (key, object) in store.objects_mut() {
            let attended = persons
                .iter()
                .any(|p| predicates::within_radius(object.centroid, p.centroid(), radius));
            if attended {
                object.attend(now);
                continue;
            }
            let unattended = object.unattended_for(now);
            if unattended > self.settings.abandoned_duration && object.mark_abandoned() {
                events.push(
                    EventDetails::AbandonedObject {
                        object_id: key.to_string(),
                        duration: round_secs(unattended),
                    }
                    .into(),
                );
            }
        }
    }

    fn check_fall(&self, person: &Detection) -> Option<EventDetails> {
        predicates::is_fallen(&person.bbox, self.settings.fall_ratio).then(|| EventDetails::Fall {
            bbox: person.bbox.as_pixels(),
            confidence: round2(person.confidence),
        })
    }

    fn check_intrusion(&self, person: &Detection) -> Option<EventDetails> {
        let center = person.centroid();
        predicates::point_in_polygon(center, &self.settings.intrusion_zone).then(|| {
            EventDetails::Intrusion {
                position: center.as_pixels(),
                confidence: round2(person.confidence),
            }
        })
    }

    fn check_loitering(
        &self,
        track_id: u32,
        person: &Detection,
        store: &mut TrackStore,
        now: Instant,
    ) -> Option<EventDetails> {
        let tracked = store.person_mut(track_id)?;
        let dwell = tracked.dwell(now);
        let drift = person.centroid().distance(tracked.origin());
        if dwell > self.settings.loitering_duration
            && drift < self.settings.loitering_distance
            && tracked.mark_fired(PersonAlert::Loitering)
        {
            return Some(EventDetails::Loitering {
                track_id,
                duration: round_secs(dwell),
                confidence: round2(person.confidence),
            });
        }
        None
    }

    fn check_violence(
        &self,
        track_id: u32,
        person: &Detection,
        weapons: &[&Detection],
        store: &mut TrackStore,
    ) -> Option<EventDetails> {
        let tracked = store.person_mut(track_id)?;

        let aggressive = tracked.velocity_samples() >= self.settings.min_velocity_samples
            && tracked
                .mean_velocity()
                .is_some_and(|mean| mean > self.settings.speed_threshold);
        if aggressive && tracked.mark_fired(PersonAlert::Violence) {
            return Some(EventDetails::Violence {
                track_id,
                reason: ViolenceReason::AggressiveMovement,
                confidence: round2(person.confidence),
            });
        }

        let (half_w, half_h) = self.settings.weapon_reach;
        let center = person.centroid();
        let held = weapons
            .iter()
            .find(|w| predicates::within_reach(center, w.centroid(), half_w, half_h))?;
        if tracked.mark_fired(PersonAlert::Weapon) {
            return Some(EventDetails::Violence {
                track_id,
                reason: ViolenceReason::WeaponDetected,
                confidence: round2(held.confidence),
            });
        }
        None
    }
}

impl Default for EventDetector {
    fn default() -> Self {
        Self::new(DetectorSettings::default())
    }
}

fn round_secs(duration: Duration) -> u64 {
    duration.as_secs_f64().round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ObjectClass};
    use crate::EventKind;

    const PERSON: u32 = 0;
    const BAG: u32 = 24;
    const KNIFE: u32 = 43;

    fn row(x1: f32, y1: f32, x2: f32, y2: f32, id: i64, conf: f32, class: u32) -> Vec<f32> {
        vec![x1, y1, x2, y2, id as f32, conf, class as f32]
    }

    /// Upright person box centred on (cx, cy).
    fn standing(cx: f32, cy: f32, id: i64) -> Vec<f32> {
        row(cx - 25.0, cy - 100.0, cx + 25.0, cy + 100.0, id, 0.9, PERSON)
    }

    fn bag(cx: f32, cy: f32, id: i64) -> Vec<f32> {
        row(cx - 20.0, cy - 20.0, cx + 20.0, cy + 20.0, id, 0.8, BAG)
    }

    fn kinds(events: &[DetectedEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    fn frame() -> Frame {
        Frame::blank(640, 480, 0)
    }

    fn short_settings() -> DetectorSettings {
        DetectorSettings {
            loitering_duration: Duration::from_secs(10),
            abandoned_duration: Duration::from_secs(8),
            ..DetectorSettings::default()
        }
    }

    struct Harness {
        detector: EventDetector,
        store: TrackStore,
        frame: Frame,
        t0: Instant,
    }

    impl Harness {
        fn new(settings: DetectorSettings) -> Self {
            Self {
                detector: EventDetector::new(settings),
                store: TrackStore::default(),
                frame: frame(),
                t0: Instant::now(),
            }
        }

        fn at(&mut self, secs: f32, rows: &[Vec<f32>]) -> Vec<DetectedEvent> {
            let batch = DetectionBatch::from_rows(rows);
            let now = self.t0 + Duration::from_secs_f32(secs);
            self.detector.process(&batch, &mut self.store, &self.frame, now)
        }
    }

    #[test]
    fn empty_and_malformed_batches_yield_nothing() {
        let mut h = Harness::new(short_settings());
        h.frame.fill(Roi::full(640, 480), [0, 165, 255]);
        assert!(h.at(0.0, &[]).is_empty());
        assert!(h.at(1.0, &[vec![100.0, 100.0, 300.0, 150.0, 0.9, 0.0]]).is_empty());
        assert_eq!(h.store.person_count(), 0);
    }

    #[test]
    fn fallen_person_emits_fall_with_bbox() {
        let mut h = Harness::new(short_settings());
        let events = h.at(0.0, &[row(100.0, 100.0, 300.0, 150.0, 1, 0.876, PERSON)]);
        assert_eq!(
            events,
            vec![DetectedEvent::from(EventDetails::Fall {
                bbox: [100, 100, 300, 150],
                confidence: 0.88,
            })]
        );
        assert!(h.at(0.1, &[row(100.0, 100.0, 150.0, 300.0, 1, 0.9, PERSON)]).is_empty());
    }

    #[test]
    fn intrusion_uses_configured_zone() {
        let mut settings = short_settings();
        settings.intrusion_zone = vec![
            Point::new(10.0, 10.0),
            Point::new(100.0, 10.0),
            Point::new(100.0, 100.0),
            Point::new(10.0, 100.0),
        ];
        let mut h = Harness::new(settings);
        let events = h.at(0.0, &[row(40.0, 40.0, 60.0, 60.0, 1, 0.9, PERSON)]);
        assert_eq!(kinds(&events), vec![EventKind::IntrusionDetected]);
        assert_eq!(
            events[0].details,
            EventDetails::Intrusion {
                position: [50, 50],
                confidence: 0.9
            }
        );
        assert!(h.at(0.1, &[standing(200.0, 300.0, 2)]).is_empty());
    }

    #[test]
    fn untracked_person_gets_stateless_checks_only() {
        let mut h = Harness::new(short_settings());
        let events = h.at(0.0, &[row(100.0, 100.0, 300.0, 150.0, -1, 0.9, PERSON)]);
        assert_eq!(kinds(&events), vec![EventKind::FallDetected]);
        assert_eq!(h.store.person_count(), 0);
    }

    #[test]
    fn loitering_fires_exactly_once() {
        let mut h = Harness::new(short_settings());
        let mut fired = 0;
        for step in 0..40 {
            let secs = step as f32 * 0.5;
            let jitter = (step % 3) as f32 * 5.0;
            let events = h.at(secs, &[standing(320.0 + jitter, 240.0, 7)]);
            for event in &events {
                assert_eq!(event.kind, EventKind::LoiteringDetected);
                assert_eq!(
                    event.details,
                    EventDetails::Loitering {
                        track_id: 7,
                        duration: 11,
                        confidence: 0.9
                    }
                );
            }
            fired += events.len();
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn loitering_requires_staying_near_first_position() {
        let mut h = Harness::new(short_settings());
        h.at(0.0, &[standing(100.0, 240.0, 3)]);
        // wander off before the threshold and stay away
        for step in 1..30 {
            let events = h.at(step as f32, &[standing(100.0 + 60.0 + step as f32, 240.0, 3)]);
            assert!(events.is_empty(), "unexpected {:?} at {}s", events, step);
        }
    }

    #[test]
    fn loitering_measures_from_first_position_not_window() {
        let mut h = Harness::new(short_settings());
        h.at(0.0, &[standing(100.0, 240.0, 5)]);
        // move away early, then stand still long enough to flush the position history
        for step in 1..60 {
            let events = h.at(step as f32 * 0.5, &[standing(300.0, 240.0, 5)]);
            assert!(events.is_empty());
        }
        let person = h.store.person(5).unwrap();
        assert_eq!(person.origin(), Point::new(100.0, 240.0));
        assert_eq!(person.positions().next(), Some(&Point::new(300.0, 240.0)));
    }

    #[test]
    fn aggressive_movement_needs_four_fast_samples() {
        let mut h = Harness::new(short_settings());
        let xs = [0.0, 200.0, 0.0, 200.0, 0.0, 200.0];
        let mut all = Vec::new();
        for (i, x) in xs.iter().enumerate() {
            let events = h.at(i as f32 * 0.1, &[standing(100.0 + x, 240.0, 9)]);
            if i < 4 {
                assert!(events.is_empty(), "fired with {} samples", i);
            }
            all.extend(events);
        }
        assert_eq!(
            all,
            vec![DetectedEvent::from(EventDetails::Violence {
                track_id: 9,
                reason: ViolenceReason::AggressiveMovement,
                confidence: 0.9,
            })]
        );
    }

    #[test]
    fn weapon_near_person_fires_once_per_track() {
        let mut h = Harness::new(short_settings());
        let knife = row(360.0, 360.0, 380.0, 380.0, 50, 0.734, KNIFE);
        let events = h.at(0.0, &[standing(320.0, 240.0, 4), knife.clone()]);
        assert_eq!(
            events,
            vec![DetectedEvent::from(EventDetails::Violence {
                track_id: 4,
                reason: ViolenceReason::WeaponDetected,
                confidence: 0.73,
            })]
        );
        assert!(h.at(0.1, &[standing(320.0, 240.0, 4), knife.clone()]).is_empty());

        // another person holding the same knife is a separate track
        let events = h.at(0.2, &[standing(320.0, 240.0, 4), standing(370.0, 300.0, 8), knife]);
        assert_eq!(kinds(&events), vec![EventKind::ViolenceDetected]);
    }

    #[test]
    fn movement_and_weapon_fire_separately_on_one_track() {
        let mut h = Harness::new(short_settings());
        let xs = [0.0, 200.0, 0.0, 200.0, 0.0, 200.0];
        let mut all = Vec::new();
        for (i, x) in xs.iter().enumerate() {
            all.extend(h.at(i as f32 * 0.1, &[standing(100.0 + x, 240.0, 9)]));
        }
        // knife centred at (320, 310), inside the reach box of the person at (300, 240)
        let knife = row(310.0, 300.0, 330.0, 320.0, 60, 0.8, KNIFE);
        all.extend(h.at(0.6, &[standing(300.0, 240.0, 9), knife.clone()]));
        all.extend(h.at(0.7, &[standing(300.0, 240.0, 9), knife.clone()]));
        all.extend(h.at(0.8, &[standing(300.0, 240.0, 9), knife]));

        assert_eq!(
            all,
            vec![
                DetectedEvent::from(EventDetails::Violence {
                    track_id: 9,
                    reason: ViolenceReason::AggressiveMovement,
                    confidence: 0.9,
                }),
                DetectedEvent::from(EventDetails::Violence {
                    track_id: 9,
                    reason: ViolenceReason::WeaponDetected,
                    confidence: 0.8,
                }),
            ]
        );
        let person = h.store.person(9).unwrap();
        assert!(person.has_fired(PersonAlert::Violence));
        assert!(person.has_fired(PersonAlert::Weapon));
    }

    #[test]
    fn weapon_outside_reach_is_ignored() {
        let mut h = Harness::new(short_settings());
        let far_knife = row(400.0, 230.0, 420.0, 250.0, 50, 0.9, KNIFE);
        assert!(h.at(0.0, &[standing(320.0, 240.0, 4), far_knife]).is_empty());
    }

    #[test]
    fn abandoned_bag_fires_exactly_once() {
        let mut h = Harness::new(short_settings());
        let mut events = Vec::new();
        for step in 0..30 {
            events.extend(h.at(step as f32 * 0.5, &[bag(500.0, 400.0, 12)]));
        }
        assert_eq!(
            events,
            vec![DetectedEvent::from(EventDetails::AbandonedObject {
                object_id: "bag_12".to_string(),
                duration: 9,
            })]
        );
    }

    #[test]
    fn nearby_person_restarts_abandoned_clock() {
        let mut h = Harness::new(short_settings());
        h.at(0.0, &[bag(500.0, 400.0, 12)]);
        h.at(6.0, &[bag(500.0, 400.0, 12)]);
        // owner returns briefly at t=7
        assert!(h.at(7.0, &[bag(500.0, 400.0, 12), standing(450.0, 380.0, 1)]).is_empty());
        // 8.5s after the first sighting, but only 1.5s since the owner left
        assert!(h.at(8.5, &[bag(500.0, 400.0, 12)]).is_empty());
        assert!(h.at(15.0, &[bag(500.0, 400.0, 12)]).is_empty());
        let events = h.at(15.5, &[bag(500.0, 400.0, 12)]);
        assert_eq!(
            events,
            vec![DetectedEvent::from(EventDetails::AbandonedObject {
                object_id: "bag_12".to_string(),
                duration: 9,
            })]
        );
    }

    #[test]
    fn owner_hiding_bag_keeps_it_attended() {
        let mut h = Harness::new(short_settings());
        let abandoned = |events: &[DetectedEvent]| {
            events.iter().any(|e| e.kind == EventKind::AbandonedObject)
        };
        // owner puts the bag down, then stands over it so only the owner is detected
        assert!(!abandoned(&h.at(0.0, &[bag(500.0, 400.0, 12), standing(500.0, 390.0, 1)])));
        for step in 1..=20 {
            let events = h.at(step as f32, &[standing(500.0, 390.0, 1)]);
            assert!(!abandoned(&events), "fired at t={}", step);
        }
        // owner last seen at t=20; the bag is visible again
        assert!(h.at(21.0, &[bag(500.0, 400.0, 12)]).is_empty());
        assert!(h.at(28.0, &[bag(500.0, 400.0, 12)]).is_empty());
        assert_eq!(
            h.at(28.5, &[bag(500.0, 400.0, 12)]),
            vec![DetectedEvent::from(EventDetails::AbandonedObject {
                object_id: "bag_12".to_string(),
                duration: 9,
            })]
        );
    }

    #[test]
    fn unseen_bag_still_ages_without_people_nearby() {
        let mut h = Harness::new(short_settings());
        h.at(0.0, &[bag(500.0, 400.0, 12)]);
        // the bag drops out of the detections; a passer-by far away keeps frames non-empty
        assert!(h.at(5.0, &[standing(50.0, 100.0, 2)]).is_empty());
        let events = h.at(9.0, &[standing(60.0, 100.0, 2)]);
        assert_eq!(
            events,
            vec![DetectedEvent::from(EventDetails::AbandonedObject {
                object_id: "bag_12".to_string(),
                duration: 9,
            })]
        );
    }

    #[test]
    fn fire_runs_once_per_frame() {
        let mut settings = short_settings();
        settings.fire.roi = Roi::new(0, 0, 100, 100);
        let mut h = Harness::new(settings);
        h.frame.fill(Roi::new(0, 0, 100, 20), [0, 165, 255]);
        let events = h.at(0.0, &[standing(320.0, 240.0, 1), standing(420.0, 240.0, 2)]);
        assert_eq!(
            events,
            vec![DetectedEvent::from(EventDetails::FireSmoke {
                pixel_percentage: 20.0
            })]
        );
    }

    #[test]
    fn fire_below_threshold_is_quiet() {
        let mut settings = short_settings();
        settings.fire.roi = Roi::new(0, 0, 100, 100);
        let mut h = Harness::new(settings);
        h.frame.fill(Roi::new(0, 0, 100, 10), [0, 165, 255]);
        assert!(h.at(0.0, &[standing(320.0, 240.0, 1)]).is_empty());
    }

    #[test]
    fn rules_co_occur_in_fixed_order() {
        let mut settings = short_settings();
        settings.fire.roi = Roi::new(0, 0, 100, 100);
        settings.intrusion_zone = vec![
            Point::new(150.0, 150.0),
            Point::new(350.0, 150.0),
            Point::new(350.0, 350.0),
            Point::new(150.0, 350.0),
        ];
        let mut h = Harness::new(settings);
        h.frame.fill(Roi::new(0, 0, 100, 100), [0, 165, 255]);
        h.at(0.0, &[bag(600.0, 50.0, 3)]);
        let fallen = row(200.0, 230.0, 300.0, 260.0, 1, 0.9, PERSON);
        let events = h.at(9.0, &[bag(600.0, 50.0, 3), fallen]);
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::FireSmokeDetected,
                EventKind::AbandonedObject,
                EventKind::FallDetected,
                EventKind::IntrusionDetected,
            ]
        );
    }

    #[test]
    fn other_classes_do_not_trigger_rules() {
        let mut h = Harness::new(short_settings());
        let det = Detection::new(
            BoundingBox::new(100.0, 100.0, 300.0, 150.0),
            Some(1),
            ObjectClass::Other,
            0.9,
        );
        let batch = DetectionBatch::new(vec![det]);
        let events = h.detector.process(&batch, &mut h.store, &h.frame, h.t0);
        assert!(events.is_empty());
        assert_eq!(h.store.person_count(), 0);
    }
}
