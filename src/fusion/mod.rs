//! Cross-camera track fusion on the shared ground plane.
//!
//! Each tick the engine receives every camera's local tracks, already
//! projected into canonical ground pixels, and associates them with the
//! global tracks of the previous tick by greedy nearest-neighbour matching.

mod trajectory;

pub use trajectory::{Trajectory, TrajectoryPoint};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calibration::Point2;
use crate::camera::CameraId;
use crate::detect::ObjectClass;

pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 50.0;
pub const DEFAULT_EXPIRY_TICKS: u32 = 30;
pub const DEFAULT_TRAJECTORY_CAPACITY: usize = 100;
pub const DEFAULT_VELOCITY_ALPHA: f64 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Maximum ground distance (canonical pixels) for two observations to
    /// be the same object.
    pub distance_threshold: f64,
    /// Consecutive unmatched ticks a global track survives.
    pub expiry_ticks: u32,
    pub trajectory_capacity: usize,
    /// Weight of the newest step in the velocity average; lower is smoother.
    #[serde(default = "default_velocity_alpha")]
    pub velocity_alpha: f64,
}

fn default_velocity_alpha() -> f64 {
    DEFAULT_VELOCITY_ALPHA
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            expiry_ticks: DEFAULT_EXPIRY_TICKS,
            trajectory_capacity: DEFAULT_TRAJECTORY_CAPACITY,
            velocity_alpha: DEFAULT_VELOCITY_ALPHA,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1.0..=600.0).contains(&self.distance_threshold) {
            bail!(
                "fusion distance threshold must be within 1..=600, got {}",
                self.distance_threshold
            );
        }
        if !(1..=1000).contains(&self.expiry_ticks) {
            bail!("fusion expiry ticks must be within 1..=1000, got {}", self.expiry_ticks);
        }
        if !(1..=10_000).contains(&self.trajectory_capacity) {
            bail!(
                "trajectory capacity must be within 1..=10000, got {}",
                self.trajectory_capacity
            );
        }
        if !(0.0..=1.0).contains(&self.velocity_alpha) {
            bail!("velocity alpha must be within 0..=1, got {}", self.velocity_alpha);
        }
        Ok(())
    }
}

/// A local track's reference point projected onto the ground plane.
#[derive(Clone, Debug, PartialEq)]
pub struct GroundObservation {
    pub camera_id: CameraId,
    pub local_track_id: String,
    pub position: Point2,
    pub confidence: f32,
    pub class: ObjectClass,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalTrack {
    pub id: u64,
    pub position: Point2,
    pub confidence: f32,
    pub class: ObjectClass,
    pub trajectory: Trajectory,
    /// Local tracks that contributed on the last matched tick.
    pub cameras: BTreeMap<CameraId, String>,
    pub hits: u32,
    pub misses: u32,
    pub last_seen_ms: f64,
}

impl GlobalTrack {
    pub fn velocity(&self) -> (f64, f64) {
        self.trajectory.velocity()
    }

    fn observe(&mut self, obs: &GroundObservation, timestamp_ms: f64) {
        self.position = obs.position;
        self.confidence = obs.confidence;
        self.class = obs.class;
        self.trajectory.push(obs.position.x, obs.position.y, timestamp_ms);
        self.cameras.clear();
        self.cameras.insert(obs.camera_id, obs.local_track_id.clone());
        self.hits += 1;
        self.misses = 0;
        self.last_seen_ms = timestamp_ms;
    }

    /// A second camera sees the same object.
    fn absorb(&mut self, obs: &GroundObservation) -> bool {
        if self.cameras.contains_key(&obs.camera_id) {
            return false;
        }
        self.cameras.insert(obs.camera_id, obs.local_track_id.clone());
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    pub active_tracks: usize,
    pub total_created: u64,
    pub total_expired: u64,
    pub multi_camera_associations: u64,
}

/// What one `update` call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub matched: usize,
    pub absorbed: usize,
    pub spawned: Vec<u64>,
    pub expired: Vec<u64>,
}

pub struct FusionEngine {
    config: FusionConfig,
    tracks: Vec<GlobalTrack>,
    next_id: u64,
    total_created: u64,
    total_expired: u64,
    multi_camera_associations: u64,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            total_created: 0,
            total_expired: 0,
            multi_camera_associations: 0,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Live global tracks, oldest first.
    pub fn tracks(&self) -> &[GlobalTrack] {
        &self.tracks
    }

    pub fn stats(&self) -> FusionStats {
        FusionStats {
            active_tracks: self.tracks.len(),
            total_created: self.total_created,
            total_expired: self.total_expired,
            multi_camera_associations: self.multi_camera_associations,
        }
    }

    /// Run one association tick.
    pub fn update(&mut self, observations: &[GroundObservation], timestamp_ms: f64) -> TickSummary {
        let threshold = self.config.distance_threshold;
        let existing = self.tracks.len();
        let mut claimed = vec![false; observations.len()];
        let mut matched = vec![false; existing];
        let mut summary = TickSummary::default();

        // Closest pairs first, so each track takes its nearest free observation.
        let mut pairs = candidate_pairs(&self.tracks, observations, threshold, |_, _| true);
        sort_pairs(&mut pairs);
        for (_, ti, oi) in pairs {
            if matched[ti] || claimed[oi] {
                continue;
            }
            matched[ti] = true;
            claimed[oi] = true;
            self.tracks[ti].observe(&observations[oi], timestamp_ms);
            summary.matched += 1;
        }

        // Other cameras seeing an already matched object.
        let mut extra = candidate_pairs(&self.tracks, observations, threshold, |ti, oi| {
            matched[ti] && !claimed[oi]
        });
        sort_pairs(&mut extra);
        for (_, ti, oi) in extra {
            if claimed[oi] {
                continue;
            }
            if self.tracks[ti].absorb(&observations[oi]) {
                claimed[oi] = true;
                summary.absorbed += 1;
                self.multi_camera_associations += 1;
            }
        }

        // Leftovers seed new tracks, strongest first; a weaker observation from
        // another camera may still join a track spawned this tick.
        let mut rest: Vec<usize> = (0..observations.len()).filter(|&i| !claimed[i]).collect();
        rest.sort_by(|&a, &b| {
            observations[b]
                .confidence
                .total_cmp(&observations[a].confidence)
                .then(a.cmp(&b))
        });
        for oi in rest {
            let obs = &observations[oi];
            let joined = self.tracks[existing..]
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.cameras.contains_key(&obs.camera_id))
                .map(|(i, t)| (t.position.distance(&obs.position), existing + i))
                .filter(|(d, _)| *d < threshold)
                .min_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((_, ti)) = joined {
                self.tracks[ti].absorb(obs);
                summary.absorbed += 1;
                self.multi_camera_associations += 1;
                continue;
            }
            let id = self.spawn(obs, timestamp_ms);
            summary.spawned.push(id);
        }

        // Age out tracks nobody matched this tick.
        let expiry = self.config.expiry_ticks;
        for (track, hit) in self.tracks[..existing].iter_mut().zip(&matched) {
            if !hit {
                track.misses += 1;
            }
        }
        self.tracks.retain(|track| {
            if track.misses > expiry {
                summary.expired.push(track.id);
                false
            } else {
                true
            }
        });
        self.total_expired += summary.expired.len() as u64;
        for id in &summary.expired {
            log::debug!("global track {} expired", id);
        }

        summary
    }

    /// Drop all tracks. Ids keep increasing.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    fn spawn(&mut self, obs: &GroundObservation, timestamp_ms: f64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.total_created += 1;
        let mut track = GlobalTrack {
            id,
            position: obs.position,
            confidence: obs.confidence,
            class: obs.class,
            trajectory: Trajectory::new(self.config.trajectory_capacity, self.config.velocity_alpha),
            cameras: BTreeMap::new(),
            hits: 0,
            misses: 0,
            last_seen_ms: timestamp_ms,
        };
        track.observe(obs, timestamp_ms);
        self.tracks.push(track);
        log::debug!("global track {} spawned from camera {}", id, obs.camera_id);
        id
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

fn candidate_pairs(
    tracks: &[GlobalTrack],
    observations: &[GroundObservation],
    threshold: f64,
    keep: impl Fn(usize, usize) -> bool,
) -> Vec<(f64, usize, usize)> {
    let mut pairs = Vec::new();
    for (ti, track) in tracks.iter().enumerate() {
        for (oi, obs) in observations.iter().enumerate() {
            if !keep(ti, oi) {
                continue;
            }
            let d = track.position.distance(&obs.position);
            if d < threshold {
                pairs.push((d, ti, oi));
            }
        }
    }
    pairs
}

fn sort_pairs(pairs: &mut [(f64, usize, usize)]) {
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(camera: u32, id: &str, x: f64, y: f64) -> GroundObservation {
        GroundObservation {
            camera_id: CameraId(camera),
            local_track_id: id.to_string(),
            position: Point2::new(x, y),
            confidence: 0.8,
            class: ObjectClass::Person,
        }
    }

    #[test]
    fn nearby_tracks_from_two_cameras_merge_in_one_tick() {
        let mut engine = FusionEngine::default();
        let summary = engine.update(&[obs(0, "a", 100.0, 100.0), obs(1, "b", 120.0, 110.0)], 0.0);
        assert_eq!(summary.spawned.len(), 1);
        assert_eq!(summary.absorbed, 1);
        assert_eq!(engine.tracks().len(), 1);
        assert_eq!(engine.tracks()[0].cameras.len(), 2);
        assert_eq!(engine.stats().multi_camera_associations, 1);
    }

    #[test]
    fn distant_tracks_spawn_separately() {
        let mut engine = FusionEngine::default();
        engine.update(&[obs(0, "a", 100.0, 100.0), obs(1, "b", 300.0, 100.0)], 0.0);
        assert_eq!(engine.tracks().len(), 2);
        assert_eq!(engine.stats().total_created, 2);
    }

    #[test]
    fn same_camera_objects_stay_distinct() {
        let mut engine = FusionEngine::default();
        engine.update(&[obs(0, "a", 100.0, 100.0), obs(0, "b", 110.0, 100.0)], 0.0);
        assert_eq!(engine.tracks().len(), 2);
    }

    #[test]
    fn closest_observation_wins() {
        let mut engine = FusionEngine::default();
        engine.update(&[obs(0, "a", 100.0, 100.0)], 0.0);
        let id = engine.tracks()[0].id;
        engine.update(&[obs(0, "far", 140.0, 100.0), obs(0, "near", 105.0, 100.0)], 100.0);
        let track = engine.tracks().iter().find(|t| t.id == id).unwrap();
        assert_eq!(track.position, Point2::new(105.0, 100.0));
        assert_eq!(track.cameras.get(&CameraId(0)).map(String::as_str), Some("near"));
        assert_eq!(engine.tracks().len(), 2);
    }

    #[test]
    fn matched_track_moves_and_gains_velocity() {
        let mut engine = FusionEngine::default();
        engine.update(&[obs(0, "a", 100.0, 100.0)], 0.0);
        engine.update(&[obs(0, "a", 110.0, 100.0)], 500.0);
        let track = &engine.tracks()[0];
        assert_eq!(track.hits, 2);
        assert_eq!(track.trajectory.len(), 2);
        assert_eq!(track.velocity(), (20.0, 0.0));
    }

    #[test]
    fn unmatched_track_expires_and_id_is_not_reused() {
        let config = FusionConfig {
            expiry_ticks: 2,
            ..FusionConfig::default()
        };
        let mut engine = FusionEngine::new(config);
        engine.update(&[obs(0, "a", 100.0, 100.0)], 0.0);
        let old = engine.tracks()[0].id;
        for tick in 1..=2 {
            engine.update(&[], tick as f64 * 100.0);
            assert_eq!(engine.tracks().len(), 1);
        }
        let summary = engine.update(&[], 300.0);
        assert_eq!(summary.expired, vec![old]);
        assert!(engine.tracks().is_empty());

        engine.update(&[obs(0, "a", 100.0, 100.0)], 400.0);
        assert_ne!(engine.tracks()[0].id, old);
        assert_eq!(engine.stats().total_expired, 1);
    }

    #[test]
    fn config_ranges_are_enforced() {
        assert!(FusionConfig::default().validate().is_ok());
        let bad = FusionConfig {
            distance_threshold: 0.0,
            ..FusionConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = FusionConfig {
            expiry_ticks: 0,
            ..FusionConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = FusionConfig {
            velocity_alpha: 1.5,
            ..FusionConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
