//! Per-tick vision processing: detect, track, project, fuse.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::calibration::{CalibrationError, Calibrator, Homography, PointPair};
use crate::camera::{CameraId, CameraSet};
use crate::detect::{TrackerBackend, TrackerRegistry};
use crate::frame::Frame;
use crate::fusion::{FusionConfig, FusionEngine, FusionStats, GroundObservation};
use crate::metadata::{BevTrack, StreamData, VisionMetadata};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub ticks: u64,
    pub last_processing_ms: f64,
    pub backend_errors: u64,
    pub fusion: FusionStats,
}

pub struct VisionProcessor {
    cameras: CameraSet,
    calibrator: Calibrator,
    backends: BTreeMap<CameraId, Box<dyn TrackerBackend>>,
    fusion: FusionEngine,
    frame_id: u64,
    stats: ProcessorStats,
    warned_uncalibrated: bool,
}

impl VisionProcessor {
    /// One `backend` instance is created per enabled camera.
    pub fn new(
        cameras: CameraSet,
        calibrator: Calibrator,
        registry: &TrackerRegistry,
        backend: &str,
        fusion: FusionConfig,
    ) -> Result<Self> {
        fusion.validate()?;
        let mut backends = BTreeMap::new();
        for id in cameras.enabled_ids() {
            backends.insert(id, registry.create(backend)?);
        }
        log::info!(
            "vision processor ready: {} cameras, tracker '{}'",
            backends.len(),
            backend
        );
        Ok(Self {
            cameras,
            calibrator,
            backends,
            fusion: FusionEngine::new(fusion),
            frame_id: 0,
            stats: ProcessorStats::default(),
            warned_uncalibrated: false,
        })
    }

    pub fn cameras(&self) -> &CameraSet {
        &self.cameras
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn calibrator_mut(&mut self) -> &mut Calibrator {
        &mut self.calibrator
    }

    pub fn calibrate(
        &mut self,
        camera: CameraId,
        pairs: &[PointPair],
    ) -> Result<Homography, CalibrationError> {
        self.calibrator.calibrate(&self.cameras, camera, pairs)
    }

    pub fn fusion(&self) -> &FusionEngine {
        &self.fusion
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            fusion: self.fusion.stats(),
            ..self.stats
        }
    }

    /// Forget all per-camera and fused tracks.
    pub fn reset_tracking(&mut self) {
        for backend in self.backends.values_mut() {
            backend.reset();
        }
        self.fusion.reset();
    }

    /// Process the frames captured for one tick at `timestamp_ms` on the
    /// media timeline.
    pub fn process(&mut self, frames: &[Frame], timestamp_ms: f64) -> Result<VisionMetadata> {
        let started = Instant::now();
        let uncalibrated = self.calibrator.missing(&self.cameras);
        let fuse = uncalibrated.is_empty();

        let mut all_streams = BTreeMap::new();
        let mut observations = Vec::new();
        for frame in frames {
            let camera = frame.camera_id;
            let Some(backend) = self.backends.get_mut(&camera) else {
                log::warn!("dropping frame from inactive camera {}", camera);
                continue;
            };
            let result = backend
                .detect(frame)
                .and_then(|detections| {
                    let tracks = backend.track(camera, &detections, timestamp_ms)?;
                    Ok((detections, tracks))
                });
            let (detections, tracks) = match result {
                Ok(out) => out,
                Err(e) => {
                    self.stats.backend_errors += 1;
                    log::warn!("camera {}: tracker failed: {:#}", camera, e);
                    continue;
                }
            };

            let mut data = StreamData::from_results(&detections, &tracks);
            for (record, track) in data.tracks.iter_mut().zip(&tracks) {
                let Some(ground) = self
                    .calibrator
                    .transform_point(camera, track.reference_point())
                else {
                    continue;
                };
                record.ground_position = Some(ground.into());
                if fuse {
                    observations.push(GroundObservation {
                        camera_id: camera,
                        local_track_id: track.track_id.clone(),
                        position: ground,
                        confidence: track.confidence,
                        class: track.class,
                    });
                }
            }
            all_streams.insert(camera, data);
        }

        let bev_tracks = if fuse {
            self.warned_uncalibrated = false;
            self.fusion.update(&observations, timestamp_ms);
            self.fusion.tracks().iter().map(BevTrack::from).collect()
        } else {
            if !self.warned_uncalibrated {
                log::warn!(
                    "fusion paused until cameras {:?} are calibrated",
                    uncalibrated.iter().map(|c| c.0).collect::<Vec<_>>()
                );
                self.warned_uncalibrated = true;
            }
            Vec::new()
        };

        self.frame_id += 1;
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.ticks += 1;
        self.stats.last_processing_ms = processing_time_ms;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("system clock before epoch: {}", e))?
            .as_secs_f64();
        Ok(VisionMetadata {
            timestamp,
            correlation_timestamp: timestamp_ms / 1000.0,
            frame_id: self.frame_id,
            processing_time_ms,
            num_streams: all_streams.len(),
            active_stream_ids: all_streams.keys().copied().collect(),
            all_streams,
            bev_tracks,
            uncalibrated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Point2;
    use crate::camera::Camera;

    fn processor() -> VisionProcessor {
        let cameras = CameraSet::new(vec![
            Camera::new(0, "a", "stub://a"),
            Camera::new(1, "b", "stub://b"),
        ])
        .unwrap();
        VisionProcessor::new(
            cameras,
            Calibrator::default(),
            &TrackerRegistry::with_builtin(),
            "stub",
            FusionConfig::default(),
        )
        .unwrap()
    }

    fn frames(ts: f64) -> Vec<Frame> {
        vec![
            Frame::blank(CameraId(0), 640, 360, ts),
            Frame::blank(CameraId(1), 640, 360, ts),
        ]
    }

    fn full_view() -> Vec<PointPair> {
        vec![
            PointPair::new(Point2::new(0.0, 0.0), Point2::new(0.0, 0.0)),
            PointPair::new(Point2::new(640.0, 0.0), Point2::new(1.0, 0.0)),
            PointPair::new(Point2::new(640.0, 360.0), Point2::new(1.0, 1.0)),
            PointPair::new(Point2::new(0.0, 360.0), Point2::new(0.0, 1.0)),
        ]
    }

    #[test]
    fn partial_calibration_blocks_fusion() {
        let mut p = processor();
        p.calibrate(CameraId(0), &full_view()).unwrap();
        let meta = p.process(&frames(0.0), 0.0).unwrap();
        assert!(meta.bev_tracks.is_empty());
        assert_eq!(meta.uncalibrated, vec![CameraId(1)]);
        assert_eq!(meta.num_streams, 2);
        assert!(meta.all_streams[&CameraId(0)].tracks[0].ground_position.is_some());
        assert!(meta.all_streams[&CameraId(1)].tracks[0].ground_position.is_none());
        assert_eq!(p.fusion().stats().total_created, 0);
    }

    #[test]
    fn complete_calibration_produces_bev_tracks() {
        let mut p = processor();
        p.calibrate(CameraId(0), &full_view()).unwrap();
        p.calibrate(CameraId(1), &full_view()).unwrap();
        let first = p.process(&frames(0.0), 0.0).unwrap();
        let second = p.process(&frames(100.0), 100.0).unwrap();
        assert!(!first.bev_tracks.is_empty());
        assert!(first.uncalibrated.is_empty());
        assert_eq!(second.frame_id, first.frame_id + 1);
        assert_eq!(second.correlation_timestamp, 0.1);
        for track in &second.bev_tracks {
            assert!(track.id.starts_with("global_"));
            assert!((0.0..=600.0).contains(&track.position[0]));
        }
        assert_eq!(p.stats().ticks, 2);
    }
}
