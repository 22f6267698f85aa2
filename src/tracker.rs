//! Per-camera multi-object tracking.
//!
//! Association is greedy nearest-centroid, evaluated detection by detection in
//! the order the detector produced them:
//!
//! 1. A detection claims the closest track (Euclidean distance strictly below the
//!    threshold) that no earlier detection claimed this update. Equal distances go
//!    to the lower (older) track id.
//! 2. Claimed tracks get a new position and an EMA-smoothed velocity.
//! 3. Unclaimed tracks are kept unchanged until unseen for longer than `max_lost_s`.
//! 4. Unclaimed detections become new tracks.
//!
//! This is deliberately not an optimal bipartite assignment.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::config::TrackerSettings;
use crate::detect::Detection;

/// Floor for the time step used in velocity estimation, in seconds.
const MIN_DT_S: f64 = 1e-3;

/// Per-camera track identifier. Monotonic and never reused by a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub position: (f64, f64),
    /// Smoothed speed in pixels per second.
    pub velocity: f64,
    pub stationary: bool,
    pub device_use: bool,
    pub last_seen: f64,
}

impl Track {
    fn spawn(id: TrackId, detection: &Detection, ts: f64) -> Self {
        Self {
            id,
            position: detection.position(),
            velocity: 0.0,
            stationary: true,
            // No device-use signal exists yet; every track reports false.
            device_use: false,
            last_seen: ts,
        }
    }

    fn distance_to(&self, detection: &Detection) -> f64 {
        (detection.x - self.position.0).hypot(detection.y - self.position.1)
    }

    pub fn state(&self) -> PersonState {
        PersonState {
            track_id: self.id,
            position: self.position,
            velocity: self.velocity,
            stationary: self.stationary,
            device_use: self.device_use,
            last_seen: self.last_seen,
        }
    }
}

/// Immutable per-tick view of a track, consumed by fusion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PersonState {
    pub track_id: TrackId,
    pub position: (f64, f64),
    pub velocity: f64,
    pub stationary: bool,
    pub device_use: bool,
    pub last_seen: f64,
}

/// What one `Tracker::update` did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackUpdate {
    pub matched: Vec<TrackId>,
    pub created: Vec<TrackId>,
    pub expired: Vec<TrackId>,
}

pub struct Tracker {
    settings: TrackerSettings,
    tracks: BTreeMap<TrackId, Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn states(&self) -> Vec<PersonState> {
        self.tracks.values().map(Track::state).collect()
    }

    /// Associate `detections` observed at `ts` (seconds) with the current tracks.
    pub fn update(&mut self, detections: &[Detection], ts: f64) -> TrackUpdate {
        let assignments = self.assign(detections);
        let mut outcome = TrackUpdate::default();

        let claimed: HashSet<TrackId> = assignments.iter().flatten().copied().collect();
        for (detection, assigned) in detections.iter().zip(&assignments) {
            if let Some(id) = assigned {
                if let Some(track) = self.tracks.get_mut(id) {
                    apply_match(&self.settings, track, detection, ts);
                    outcome.matched.push(*id);
                }
            }
        }

        let max_lost_s = self.settings.max_lost_s;
        self.tracks.retain(|id, track| {
            let keep = claimed.contains(id) || ts - track.last_seen <= max_lost_s;
            if !keep {
                outcome.expired.push(*id);
            }
            keep
        });

        for (detection, assigned) in detections.iter().zip(&assignments) {
            if assigned.is_none() {
                let id = TrackId(self.next_id);
                self.next_id += 1;
                self.tracks.insert(id, Track::spawn(id, detection, ts));
                outcome.created.push(id);
            }
        }

        if !outcome.created.is_empty() || !outcome.expired.is_empty() {
            log::debug!(
                "tracker: +{} -{} ({} live)",
                outcome.created.len(),
                outcome.expired.len(),
                self.tracks.len()
            );
        }
        outcome
    }

    /// Greedy first-claim-wins assignment, one entry per detection.
    fn assign(&self, detections: &[Detection]) -> Vec<Option<TrackId>> {
        let mut claimed = HashSet::new();
        detections
            .iter()
            .map(|detection| {
                let mut best: Option<TrackId> = None;
                let mut best_distance = self.settings.distance_threshold;
                for track in self.tracks.values() {
                    if claimed.contains(&track.id) {
                        continue;
                    }
                    let distance = track.distance_to(detection);
                    if distance < best_distance {
                        best_distance = distance;
                        best = Some(track.id);
                    }
                }
                if let Some(id) = best {
                    claimed.insert(id);
                }
                best
            })
            .collect()
    }
}

fn apply_match(settings: &TrackerSettings, track: &mut Track, detection: &Detection, ts: f64) {
    let dt = (ts - track.last_seen).max(MIN_DT_S);
    let instantaneous = track.distance_to(detection) / dt;
    let alpha = settings.ema_alpha;
    track.velocity = alpha * instantaneous + (1.0 - alpha) * track.velocity;
    track.stationary = track.velocity < settings.stationary_threshold;
    track.position = detection.position();
    track.last_seen = ts;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TrackerSettings {
        TrackerSettings {
            distance_threshold: 60.0,
            max_lost_s: 1.5,
            ema_alpha: 0.5,
            stationary_threshold: 5.0,
        }
    }

    fn det(x: f64, y: f64) -> Detection {
        Detection::new(x, y)
    }

    #[test]
    fn unmatched_detections_spawn_stationary_tracks() {
        let mut tracker = Tracker::new(settings());
        let outcome = tracker.update(&[det(10.0, 10.0), det(200.0, 200.0)], 0.0);

        assert_eq!(outcome.created, vec![TrackId(1), TrackId(2)]);
        let track = tracker.get(TrackId(1)).unwrap();
        assert_eq!(track.velocity, 0.0);
        assert!(track.stationary);
        assert!(!track.device_use);
        assert_eq!(track.last_seen, 0.0);
    }

    #[test]
    fn matched_track_gets_smoothed_velocity() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 0.0);
        let outcome = tracker.update(&[det(30.0, 40.0)], 1.0);

        assert_eq!(outcome.matched, vec![TrackId(1)]);
        let track = tracker.get(TrackId(1)).unwrap();
        // Moved 50 px in 1 s, EMA with alpha 0.5 from 0.
        assert!((track.velocity - 25.0).abs() < 1e-9);
        assert!(!track.stationary);
        assert_eq!(track.position, (30.0, 40.0));
        assert_eq!(track.last_seen, 1.0);
    }

    #[test]
    fn zero_elapsed_time_is_floored() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 5.0);
        tracker.update(&[det(1.0, 0.0)], 5.0);
        let track = tracker.get(TrackId(1)).unwrap();
        assert!(track.velocity.is_finite());
        assert!((track.velocity - 0.5 * 1.0 / MIN_DT_S).abs() < 1e-6);
    }

    #[test]
    fn detection_exactly_at_threshold_is_not_a_match() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 0.0);
        let outcome = tracker.update(&[det(60.0, 0.0)], 0.1);

        assert!(outcome.matched.is_empty());
        assert_eq!(outcome.created, vec![TrackId(2)]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn first_detection_claims_the_track() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(100.0, 100.0)], 0.0);

        // The second detection is closer, but the first claims the track.
        let outcome = tracker.update(&[det(120.0, 100.0), det(101.0, 100.0)], 0.1);
        assert_eq!(outcome.matched, vec![TrackId(1)]);
        assert_eq!(outcome.created, vec![TrackId(2)]);
        assert_eq!(tracker.get(TrackId(1)).unwrap().position, (120.0, 100.0));
        assert_eq!(tracker.get(TrackId(2)).unwrap().position, (101.0, 100.0));
    }

    #[test]
    fn claimed_tracks_are_skipped_for_later_detections() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0), det(50.0, 0.0)], 0.0);

        // Both detections are closest to track 1; the second falls back to track 2.
        let outcome = tracker.update(&[det(5.0, 0.0), det(10.0, 0.0)], 0.1);
        assert_eq!(outcome.matched, vec![TrackId(1), TrackId(2)]);
        assert!(outcome.created.is_empty());
    }

    #[test]
    fn equal_distances_go_to_the_older_track() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0), det(20.0, 0.0)], 0.0);
        let outcome = tracker.update(&[det(10.0, 0.0)], 0.1);
        assert_eq!(outcome.matched, vec![TrackId(1)]);
    }

    #[test]
    fn track_count_is_matched_plus_created_plus_retained() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0), det(300.0, 300.0)], 0.0);

        let outcome = tracker.update(&[det(2.0, 0.0), det(600.0, 600.0)], 0.5);
        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.expired.is_empty());
        // Track 2 was unmatched for one tick but is retained.
        assert_eq!(tracker.len(), 3);
        assert!(tracker.get(TrackId(2)).is_some());
    }

    #[test]
    fn unmatched_track_survives_until_timeout() {
        let eps = 1e-6;
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 10.0);

        tracker.update(&[], 10.0 + 1.5 - eps);
        assert_eq!(tracker.len(), 1);

        let outcome = tracker.update(&[], 10.0 + 1.5 + eps);
        assert_eq!(outcome.expired, vec![TrackId(1)]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn unmatched_tracks_are_left_unchanged() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 0.0);
        tracker.update(&[det(10.0, 0.0)], 1.0);
        let before = tracker.get(TrackId(1)).unwrap().clone();

        tracker.update(&[], 1.5);
        assert_eq!(tracker.get(TrackId(1)).unwrap(), &before);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 0.0);
        tracker.update(&[], 10.0);
        assert!(tracker.is_empty());

        let outcome = tracker.update(&[det(0.0, 0.0)], 10.1);
        assert_eq!(outcome.created, vec![TrackId(2)]);
    }

    #[test]
    fn stationary_flag_follows_smoothed_velocity() {
        let mut tracker = Tracker::new(settings());
        tracker.update(&[det(0.0, 0.0)], 0.0);
        tracker.update(&[det(20.0, 0.0)], 1.0);
        assert!(!tracker.get(TrackId(1)).unwrap().stationary);

        // Holding still decays the EMA: 10 -> 5 -> 2.5.
        tracker.update(&[det(20.0, 0.0)], 2.0);
        assert!(!tracker.get(TrackId(1)).unwrap().stationary);
        tracker.update(&[det(20.0, 0.0)], 3.0);
        assert!(tracker.get(TrackId(1)).unwrap().stationary);
    }
}
