//! Per-tick vision metadata as delivered on the metadata channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::camera::CameraId;
use crate::detect::{Detection, LocalTrack};
use crate::fusion::{GlobalTrack, TrajectoryPoint};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: usize,
    /// `[x1, y1, x2, y2]` in image pixels.
    pub bbox: [f64; 4],
    pub confidence: f32,
    pub class_name: String,
    pub class_id: u32,
    pub bottom_center: [f64; 2],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub bbox: [f64; 4],
    pub confidence: f32,
    pub class_name: String,
    pub age: u32,
    pub bottom_center: [f64; 2],
    /// Ground projection, present once the camera is calibrated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_position: Option<[f64; 2]>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamData {
    pub detections: Vec<DetectionRecord>,
    pub tracks: Vec<TrackRecord>,
}

impl StreamData {
    pub fn from_results(detections: &[Detection], tracks: &[LocalTrack]) -> Self {
        Self {
            detections: detections
                .iter()
                .enumerate()
                .map(|(id, det)| DetectionRecord {
                    id,
                    bbox: det.bbox.corners(),
                    confidence: det.confidence,
                    class_name: det.class.name().to_string(),
                    class_id: det.class.id(),
                    bottom_center: det.bbox.bottom_center().into(),
                })
                .collect(),
            tracks: tracks
                .iter()
                .map(|track| TrackRecord {
                    id: track.track_id.clone(),
                    bbox: track.bbox.corners(),
                    confidence: track.confidence,
                    class_name: track.class.name().to_string(),
                    age: track.age,
                    bottom_center: track.reference_point().into(),
                    ground_position: None,
                })
                .collect(),
        }
    }
}

/// A fused track in canonical ground pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BevTrack {
    pub id: String,
    pub position: [f64; 2],
    pub velocity: [f64; 2],
    pub confidence: f32,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<TrajectoryPoint>>,
    #[serde(default)]
    pub cameras: Vec<CameraId>,
}

impl From<&GlobalTrack> for BevTrack {
    fn from(track: &GlobalTrack) -> Self {
        let (vx, vy) = track.velocity();
        Self {
            id: format!("global_{}", track.id),
            position: track.position.into(),
            velocity: [vx, vy],
            confidence: track.confidence,
            class_name: track.class.name().to_string(),
            global_id: Some(track.id),
            trajectory: Some(track.trajectory.to_vec()),
            cameras: track.cameras.keys().copied().collect(),
        }
    }
}

/// One processing tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisionMetadata {
    /// Producer wall clock, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Position on the media timeline in seconds; this is what
    /// synchronization keys on.
    pub correlation_timestamp: f64,
    pub frame_id: u64,
    pub processing_time_ms: f64,
    pub num_streams: usize,
    pub active_stream_ids: Vec<CameraId>,
    pub all_streams: BTreeMap<CameraId, StreamData>,
    pub bev_tracks: Vec<BevTrack>,
    /// Cameras that still lack a transform; fusion is idle while non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncalibrated: Vec<CameraId>,
}

impl VisionMetadata {
    /// Media timeline position in ms, rounded to the microsecond so the
    /// seconds-to-ms conversion does not leak float error into matching.
    pub fn media_time_ms(&self) -> f64 {
        (self.correlation_timestamp * 1_000_000.0).round() / 1000.0
    }
}

/// Periodic liveness report for metadata subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisionStatus {
    pub timestamp: f64,
    pub tracking_enabled: bool,
    pub active_stream_ids: Vec<CameraId>,
    pub message: String,
}
