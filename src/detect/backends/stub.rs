use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::CameraId;
use crate::detect::backend::TrackerBackend;
use crate::detect::centroid::CentroidTracker;
use crate::detect::result::{BoundingBox, Detection, LocalTrack, ObjectClass};
use crate::frame::Frame;

const WALKERS: usize = 2;

#[derive(Clone, Copy, Debug)]
struct Walker {
    phase: f64,
    speed: f64,
    lane: f64,
}

/// Deterministic backend for tests and stub:// deployments.
///
/// Simulates a few people pacing across the lower half of the image. Walker
/// paths are seeded from the camera id so every camera shows a different,
/// reproducible scene.
pub struct StubTracker {
    walkers: Option<(CameraId, [Walker; WALKERS])>,
    tracker: CentroidTracker,
}

impl StubTracker {
    pub const NAME: &'static str = "stub";

    pub fn new() -> Self {
        Self {
            walkers: None,
            tracker: CentroidTracker::new(80.0),
        }
    }

    fn walkers_for(&mut self, camera: CameraId) -> [Walker; WALKERS] {
        match self.walkers {
            Some((seeded_for, walkers)) if seeded_for == camera => walkers,
            _ => {
                let mut rng = StdRng::seed_from_u64(0x5eed_0000 + u64::from(camera.0));
                let walkers = [(); WALKERS].map(|_| Walker {
                    phase: rng.gen_range(0.0..std::f64::consts::TAU),
                    speed: rng.gen_range(0.15..0.45),
                    lane: rng.gen_range(0.55..0.85),
                });
                self.walkers = Some((camera, walkers));
                walkers
            }
        }
    }
}

impl Default for StubTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerBackend for StubTracker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("frame from camera {} has no pixels", frame.camera_id));
        }
        let (w, h) = (f64::from(frame.width), f64::from(frame.height));
        let t = frame.timestamp_ms / 1000.0;
        let (bw, bh) = (w * 0.08, h * 0.25);

        Ok(self
            .walkers_for(frame.camera_id)
            .iter()
            .map(|walker| {
                let sweep = 0.5 + 0.5 * (t * walker.speed + walker.phase).sin();
                let cx = w * (0.15 + 0.7 * sweep);
                let foot = h * walker.lane;
                Detection {
                    bbox: BoundingBox::new(cx - bw / 2.0, foot - bh, bw, bh),
                    confidence: 0.9,
                    class: ObjectClass::Person,
                }
            })
            .collect())
    }

    fn track(
        &mut self,
        camera: CameraId,
        detections: &[Detection],
        _timestamp_ms: f64,
    ) -> Result<Vec<LocalTrack>> {
        Ok(self.tracker.update(camera, detections))
    }

    fn reset(&mut self) {
        self.tracker.reset();
    }
}
