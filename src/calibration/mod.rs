//! Per-camera ground-plane calibration.
//!
//! Each camera is calibrated from exactly four image/ground correspondences.
//! The resulting homography maps image pixels into the shared bird's-eye
//! view, expressed in a canonical `canvas_size` x `canvas_size` pixel domain.
//!
//! A camera has at most one active transform. A failed calibration never
//! touches the transform already installed for that camera, and fusion is
//! blocked until every participating camera is calibrated.

mod homography;
mod store;

pub use homography::{Homography, Point2, PointPair};
pub use store::{
    CalibrationRecord, CalibrationStatus, CalibrationStore, DEFAULT_CALIBRATION_PATH,
};

use std::collections::BTreeMap;

use crate::camera::{CameraId, CameraSet};

/// Default edge length of the canonical ground domain in pixels.
pub const DEFAULT_CANVAS_SIZE: f64 = 600.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("exactly 4 point pairs are required for calibration, got {0}")]
    PointCount(usize),
    #[error("{plane} points {a} and {b} coincide")]
    Duplicate {
        plane: &'static str,
        a: usize,
        b: usize,
    },
    #[error("{plane} points {points:?} are collinear")]
    Collinear {
        plane: &'static str,
        points: [usize; 3],
    },
    #[error("ground point ({x}, {y}) lies outside the normalized [0,1] square")]
    GroundOutOfRange { x: f64, y: f64 },
    #[error("calibration input contains non-finite values")]
    NonFinite,
    #[error("point correspondences do not determine a unique homography")]
    Singular,
    #[error("camera {0} is not configured")]
    UnknownCamera(CameraId),
}

/// Owns the active transform for every calibrated camera.
#[derive(Debug, Clone)]
pub struct Calibrator {
    canvas_size: f64,
    transforms: BTreeMap<CameraId, Homography>,
}

impl Calibrator {
    pub fn new(canvas_size: f64) -> Self {
        Self {
            canvas_size,
            transforms: BTreeMap::new(),
        }
    }

    pub fn canvas_size(&self) -> f64 {
        self.canvas_size
    }

    /// Compute and install a transform for `camera`.
    ///
    /// On error the previously installed transform (if any) is kept.
    pub fn calibrate(
        &mut self,
        cameras: &CameraSet,
        camera: CameraId,
        pairs: &[PointPair],
    ) -> Result<Homography, CalibrationError> {
        if cameras.get(camera).is_none() {
            return Err(CalibrationError::UnknownCamera(camera));
        }
        let transform = Homography::from_pairs(pairs, self.canvas_size)?;
        self.transforms.insert(camera, transform);
        log::info!("camera {} calibrated", camera);
        Ok(transform)
    }

    pub fn transform(&self, camera: CameraId) -> Option<&Homography> {
        self.transforms.get(&camera)
    }

    /// Map an image point of `camera` into canonical ground pixels.
    pub fn transform_point(&self, camera: CameraId, image: Point2) -> Option<Point2> {
        self.transforms.get(&camera)?.transform_point(image)
    }

    /// True iff every enabled camera has an active transform.
    pub fn is_complete(&self, cameras: &CameraSet) -> bool {
        self.missing(cameras).is_empty()
    }

    /// Enabled cameras that still lack a transform.
    pub fn missing(&self, cameras: &CameraSet) -> Vec<CameraId> {
        cameras
            .enabled_ids()
            .into_iter()
            .filter(|id| !self.transforms.contains_key(id))
            .collect()
    }

    /// Install previously persisted transforms, skipping unusable entries.
    pub fn restore(&mut self, cameras: &CameraSet, records: &BTreeMap<CameraId, CalibrationRecord>) {
        for (camera, record) in records {
            if cameras.get(*camera).is_none() {
                log::warn!("ignoring stored calibration for unknown camera {}", camera);
                continue;
            }
            if !(record.canvas_size.is_finite() && record.canvas_size > 0.0) {
                log::warn!(
                    "stored calibration for camera {} has invalid canvas size {}",
                    camera,
                    record.canvas_size
                );
                continue;
            }
            let restored = Homography::from_matrix(record.homography_matrix).and_then(|h| {
                if record.canvas_size == self.canvas_size {
                    Ok(h)
                } else {
                    log::info!(
                        "rescaling calibration for camera {} from canvas {} to {}",
                        camera,
                        record.canvas_size,
                        self.canvas_size
                    );
                    h.rescaled(self.canvas_size / record.canvas_size)
                }
            });
            match restored {
                Ok(transform) => {
                    self.transforms.insert(*camera, transform);
                    log::info!("restored calibration for camera {}", camera);
                }
                Err(e) => log::warn!("stored calibration for camera {} rejected: {}", camera, e),
            }
        }
    }

    pub fn reset(&mut self, camera: CameraId) -> bool {
        self.transforms.remove(&camera).is_some()
    }

    pub fn reset_all(&mut self) {
        self.transforms.clear();
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS_SIZE)
    }
}
