//! Per-camera presentation delay.
//!
//! Cameras reach the server with different latencies. A fixed per-camera
//! delay shifts each feed back in time so the combined view lines up; it is
//! applied by picking, from a short history of frames, the one closest to
//! `now - delay`.

use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

use crate::camera::{CameraId, CameraSet};
use crate::sync::{SampleBuffer, Timestamped};

pub const MAX_DELAY_MS: u32 = 5000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamDelays {
    delays: BTreeMap<CameraId, u32>,
}

impl StreamDelays {
    /// Zero delay for every enabled camera.
    pub fn new(cameras: &CameraSet) -> Self {
        Self {
            delays: cameras.enabled_ids().into_iter().map(|id| (id, 0)).collect(),
        }
    }

    pub fn get(&self, camera: CameraId) -> Option<u32> {
        self.delays.get(&camera).copied()
    }

    /// Set one camera's delay, returning the previous value.
    pub fn set(&mut self, camera: CameraId, delay_ms: u32) -> Result<u32> {
        self.check(camera, delay_ms)?;
        let previous = self.delays.insert(camera, delay_ms).unwrap_or(0);
        log::info!("camera {} delay {} ms -> {} ms", camera, previous, delay_ms);
        Ok(previous)
    }

    /// Replace several delays at once. Nothing changes unless every entry is valid.
    pub fn set_all(&mut self, delays: &BTreeMap<CameraId, u32>) -> Result<()> {
        for (camera, delay_ms) in delays {
            self.check(*camera, *delay_ms)?;
        }
        for (camera, delay_ms) in delays {
            self.delays.insert(*camera, *delay_ms);
        }
        log::info!("stream delays updated: {:?}", self.delays);
        Ok(())
    }

    pub fn all(&self) -> &BTreeMap<CameraId, u32> {
        &self.delays
    }

    /// The buffered sample closest to `now_ms - delay` for `camera`.
    pub fn select_delayed<'a, T: Timestamped>(
        &self,
        camera: CameraId,
        buffer: &'a SampleBuffer<T>,
        now_ms: f64,
    ) -> Option<&'a T> {
        let target = now_ms - f64::from(self.get(camera).unwrap_or(0));
        buffer.iter().min_by(|a, b| {
            let da = (a.timestamp_ms() - target).abs();
            let db = (b.timestamp_ms() - target).abs();
            da.total_cmp(&db)
        })
    }

    fn check(&self, camera: CameraId, delay_ms: u32) -> Result<()> {
        if !self.delays.contains_key(&camera) {
            return Err(anyhow!("camera {} is not an active stream", camera));
        }
        if delay_ms > MAX_DELAY_MS {
            bail!(
                "delay for camera {} must be within 0..={} ms, got {}",
                camera,
                MAX_DELAY_MS,
                delay_ms
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    struct Tick(f64);

    impl Timestamped for Tick {
        fn timestamp_ms(&self) -> f64 {
            self.0
        }
    }

    fn cameras() -> CameraSet {
        CameraSet::new(vec![
            Camera::new(0, "a", "stub://a"),
            Camera::new(1, "b", "stub://b"),
        ])
        .unwrap()
    }

    #[test]
    fn set_all_is_all_or_nothing() {
        let mut delays = StreamDelays::new(&cameras());
        let mut update = BTreeMap::new();
        update.insert(CameraId(0), 200);
        update.insert(CameraId(1), 9000);
        assert!(delays.set_all(&update).is_err());
        assert_eq!(delays.get(CameraId(0)), Some(0));

        update.insert(CameraId(1), 300);
        delays.set_all(&update).unwrap();
        assert_eq!(delays.get(CameraId(1)), Some(300));
    }

    #[test]
    fn unknown_camera_is_rejected() {
        let mut delays = StreamDelays::new(&cameras());
        assert!(delays.set(CameraId(7), 10).is_err());
        assert_eq!(delays.set(CameraId(0), 10).unwrap(), 0);
    }

    #[test]
    fn picks_frame_closest_to_delayed_time() {
        let mut delays = StreamDelays::new(&cameras());
        delays.set(CameraId(1), 250).unwrap();
        let mut buffer = SampleBuffer::new(16);
        for ts in [0.0, 100.0, 200.0, 300.0, 400.0, 500.0] {
            buffer.push(Tick(ts));
        }
        let cam0 = delays.select_delayed(CameraId(0), &buffer, 500.0).unwrap();
        let cam1 = delays.select_delayed(CameraId(1), &buffer, 500.0).unwrap();
        assert_eq!(cam0.0, 500.0);
        assert_eq!(cam1.0, 200.0);
    }
}
