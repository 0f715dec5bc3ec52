use anyhow::Result;

use crate::camera::CameraId;
use crate::frame::Frame;

use super::result::{Detection, LocalTrack};

/// Per-camera detector and tracker.
///
/// One instance is created for every enabled camera, so implementations may
/// keep tracking state across calls without keying it by camera.
pub trait TrackerBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Associate detections with the tracks seen on previous frames.
    fn track(
        &mut self,
        camera: CameraId,
        detections: &[Detection],
        timestamp_ms: f64,
    ) -> Result<Vec<LocalTrack>>;

    /// Forget all tracking state.
    fn reset(&mut self) {}

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
