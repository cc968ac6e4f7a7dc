//! Per-camera track state.
//!
//! `TrackStore` keeps what the rules need to know about each tracked person and each
//! tracked bag across frames. Entries are created on first sight, refreshed every frame
//! the tracker reports them, and evicted once they have not been seen for a while
//! (`evict_stale`) or when the store is full (least recently seen goes first). Sticky
//! alert flags live on the entries and disappear with them.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::Point;

/// Maximum retained positions and velocities per person.
pub const HISTORY_LEN: usize = 30;

/// Default bound on persons plus objects held by one store.
pub const DEFAULT_CAPACITY: usize = 512;

/// Alert kinds that fire at most once per person track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PersonAlert {
    Loitering,
    Violence,
    Weapon,
}

#[derive(Clone, Debug)]
pub struct TrackedPerson {
    pub first_seen: Instant,
    pub last_seen: Instant,
    origin: Point,
    positions: VecDeque<Point>,
    velocities: VecDeque<f32>,
    fired: HashSet<PersonAlert>,
}

impl TrackedPerson {
    fn new(centroid: Point, now: Instant) -> Self {
        let mut positions = VecDeque::with_capacity(HISTORY_LEN);
        positions.push_back(centroid);
        Self {
            first_seen: now,
            last_seen: now,
            origin: centroid,
            positions,
            velocities: VecDeque::with_capacity(HISTORY_LEN),
            fired: HashSet::new(),
        }
    }

    fn observe(&mut self, centroid: Point, now: Instant) {
        self.last_seen = now;
        if let Some(prev) = self.positions.back() {
            push_bounded(&mut self.velocities, prev.distance(centroid));
        }
        push_bounded(&mut self.positions, centroid);
    }

    /// Centroid at the very first observation. Not affected by history eviction.
    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn latest(&self) -> Point {
        self.positions.back().copied().unwrap_or(self.origin)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Point> {
        self.positions.iter()
    }

    pub fn velocities(&self) -> impl Iterator<Item = &f32> {
        self.velocities.iter()
    }

    pub fn velocity_samples(&self) -> usize {
        self.velocities.len()
    }

    /// Mean of the recorded per-frame displacements.
    pub fn mean_velocity(&self) -> Option<f32> {
        if self.velocities.is_empty() {
            return None;
        }
        Some(self.velocities.iter().sum::<f32>() / self.velocities.len() as f32)
    }

    /// Time since the track was first seen.
    pub fn dwell(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_seen)
    }

    pub fn has_fired(&self, alert: PersonAlert) -> bool {
        self.fired.contains(&alert)
    }

    /// Mark `alert` as fired. Returns `false` if it had already fired.
    pub fn mark_fired(&mut self, alert: PersonAlert) -> bool {
        self.fired.insert(alert)
    }
}

#[derive(Clone, Debug)]
pub struct TrackedObject {
    pub centroid: Point,
    /// Start of the current unattended stretch.
    pub first_seen: Instant,
    pub last_seen: Instant,
    abandoned_fired: bool,
}

impl TrackedObject {
    /// Time since a person was last nearby (or since first sight).
    pub fn unattended_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_seen)
    }

    pub fn abandoned_fired(&self) -> bool {
        self.abandoned_fired
    }

    /// A person is near the object: restart the unattended clock.
    pub fn attend(&mut self, now: Instant) {
        self.first_seen = now;
    }

    /// Mark the abandoned alert as fired. Returns `false` if it had already fired.
    pub fn mark_abandoned(&mut self) -> bool {
        !std::mem::replace(&mut self.abandoned_fired, true)
    }
}

/// Key under which a tracked bag is stored.
pub fn object_key(track_id: u32) -> String {
    format!("bag_{}", track_id)
}

pub struct TrackStore {
    persons: HashMap<u32, TrackedPerson>,
    objects: HashMap<String, TrackedObject>,
    capacity: usize,
}

impl TrackStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            persons: HashMap::new(),
            objects: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a sighting of person `track_id` at `centroid`.
    pub fn update_person(&mut self, track_id: u32, centroid: Point, now: Instant) -> &mut TrackedPerson {
        if !self.persons.contains_key(&track_id) {
            self.make_room();
        }
        match self.persons.entry(track_id) {
            Entry::Occupied(entry) => {
                let person = entry.into_mut();
                person.observe(centroid, now);
                person
            }
            Entry::Vacant(entry) => entry.insert(TrackedPerson::new(centroid, now)),
        }
    }

    /// Record a sighting of object `key`. The unattended clock is left alone; see
    /// `TrackedObject::attend`.
    pub fn update_object(&mut self, key: &str, centroid: Point, now: Instant) -> &mut TrackedObject {
        if !self.objects.contains_key(key) {
            self.make_room();
        }
        let object = self
            .objects
            .entry(key.to_string())
            .or_insert_with(|| TrackedObject {
                centroid,
                first_seen: now,
                last_seen: now,
                abandoned_fired: false,
            });
        object.centroid = centroid;
        object.last_seen = now;
        object
    }

    /// Every stored object, seen this frame or not, in key order.
    pub fn objects_mut(&mut self) -> impl Iterator<Item = (&str, &mut TrackedObject)> + '_ {
        let mut objects: Vec<(&str, &mut TrackedObject)> = self
            .objects
            .iter_mut()
            .map(|(key, object)| (key.as_str(), object))
            .collect();
        objects.sort_by(|a, b| a.0.cmp(b.0));
        objects.into_iter()
    }

    pub fn person(&self, track_id: u32) -> Option<&TrackedPerson> {
        self.persons.get(&track_id)
    }

    pub fn person_mut(&mut self, track_id: u32) -> Option<&mut TrackedPerson> {
        self.persons.get_mut(&track_id)
    }

    pub fn object(&self, key: &str) -> Option<&TrackedObject> {
        self.objects.get(key)
    }

    pub fn person_count(&self) -> usize {
        self.persons.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Drop every entry not seen within `ttl` of `now`. Returns the number removed.
    pub fn evict_stale(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.persons.len() + self.objects.len();
        self.persons
            .retain(|_, person| now.saturating_duration_since(person.last_seen) <= ttl);
        self.objects
            .retain(|_, object| now.saturating_duration_since(object.last_seen) <= ttl);
        before - (self.persons.len() + self.objects.len())
    }

    /// Evict the least recently seen entry when the store is at capacity.
    fn make_room(&mut self) {
        if self.persons.len() + self.objects.len() < self.capacity {
            return;
        }
        let oldest_person = self
            .persons
            .iter()
            .min_by_key(|(_, p)| p.last_seen)
            .map(|(id, p)| (*id, p.last_seen));
        let oldest_object = self
            .objects
            .iter()
            .min_by_key(|(_, o)| o.last_seen)
            .map(|(key, o)| (key.clone(), o.last_seen));
        match (oldest_person, oldest_object) {
            (Some((id, p_seen)), Some((key, o_seen))) => {
                if p_seen <= o_seen {
                    self.persons.remove(&id);
                } else {
                    self.objects.remove(&key);
                }
            }
            (Some((id, _)), None) => {
                self.persons.remove(&id);
            }
            (None, Some((key, _))) => {
                self.objects.remove(&key);
            }
            (None, None) => {}
        }
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, value: T) {
    if history.len() == HISTORY_LEN {
        history.pop_front();
    }
    history.push_back(value);
}
