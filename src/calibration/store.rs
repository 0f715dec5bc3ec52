use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Calibrator, Homography, Point2, PointPair};
use crate::camera::{CameraId, CameraSet};

pub const DEFAULT_CALIBRATION_PATH: &str = "calibration_data.json";

/// Persisted calibration of one camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub homography_matrix: [[f64; 3]; 3],
    pub image_points: Vec<Point2>,
    pub ground_points: Vec<Point2>,
    pub canvas_size: f64,
    /// Seconds since the Unix epoch.
    pub calibrated_at: f64,
}

impl CalibrationRecord {
    pub fn new(transform: &Homography, pairs: &[PointPair], canvas_size: f64) -> Result<Self> {
        let calibrated_at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64();
        Ok(Self {
            homography_matrix: transform.matrix(),
            image_points: pairs.iter().map(|p| p.image).collect(),
            ground_points: pairs.iter().map(|p| p.ground).collect(),
            canvas_size,
            calibrated_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub camera_id: CameraId,
    pub calibrated: bool,
    pub calibrated_at: Option<f64>,
    pub has_transform: bool,
}

/// JSON-file persistence for calibration records, keyed `camera<ID>`.
#[derive(Clone, Debug)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<BTreeMap<CameraId, CalibrationRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read calibration file {}", self.path.display()))?;
        let document: BTreeMap<String, CalibrationRecord> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid calibration file {}: {}", self.path.display(), e))?;

        let mut records = BTreeMap::new();
        for (key, record) in document {
            match parse_camera_key(&key) {
                Some(id) => {
                    records.insert(id, record);
                }
                None => log::warn!("skipping unrecognized calibration entry '{}'", key),
            }
        }
        Ok(records)
    }

    /// Insert or replace the record for `camera`, keeping the others.
    pub fn save(&self, camera: CameraId, record: CalibrationRecord) -> Result<()> {
        let mut records = self.load()?;
        records.insert(camera, record);
        self.write(&records)?;
        log::info!(
            "saved calibration for camera {} to {}",
            camera,
            self.path.display()
        );
        Ok(())
    }

    /// Delete all persisted calibration.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).with_context(|| {
                format!("failed to remove calibration file {}", self.path.display())
            })?;
        }
        log::info!("cleared calibration data");
        Ok(())
    }

    pub fn status(&self, cameras: &CameraSet, calibrator: &Calibrator) -> Result<Vec<CalibrationStatus>> {
        let records = self.load()?;
        Ok(cameras
            .enabled_ids()
            .into_iter()
            .map(|id| CalibrationStatus {
                camera_id: id,
                calibrated: records.contains_key(&id),
                calibrated_at: records.get(&id).map(|r| r.calibrated_at),
                has_transform: calibrator.transform(id).is_some(),
            })
            .collect())
    }

    fn write(&self, records: &BTreeMap<CameraId, CalibrationRecord>) -> Result<()> {
        let document: BTreeMap<String, &CalibrationRecord> = records
            .iter()
            .map(|(id, record)| (format!("camera{}", id.0), record))
            .collect();
        let json = serde_json::to_string_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_PATH)
    }
}

fn parse_camera_key(key: &str) -> Option<CameraId> {
    key.strip_prefix("camera")?.parse().ok().map(CameraId)
}
