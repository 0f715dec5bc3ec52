//! Camera frames and frame sources.
//!
//! Decoding real RTSP/RTMP feeds is left to an external media stack; this
//! crate only ships the synthetic `stub://` source used by tests and demo
//! deployments.

use anyhow::{anyhow, Result};

use crate::camera::{Camera, CameraId};
use crate::sync::Timestamped;

/// Default synthetic frame size.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 360;

/// One decoded frame from a camera, stamped on the shared media timeline.
#[derive(Clone, Debug)]
pub struct Frame {
    pub camera_id: CameraId,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: f64,
    pub sequence: u64,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(
        camera_id: CameraId,
        width: u32,
        height: u32,
        timestamp_ms: f64,
        sequence: u64,
        pixels: Vec<u8>,
    ) -> Self {
        Self {
            camera_id,
            width,
            height,
            timestamp_ms,
            sequence,
            pixels,
        }
    }

    /// Frame without pixel data, for backends that only need geometry.
    pub fn blank(camera_id: CameraId, width: u32, height: u32, timestamp_ms: f64) -> Self {
        Self::new(camera_id, width, height, timestamp_ms, 0, Vec::new())
    }

    /// Grayscale pixels, row major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl Timestamped for Frame {
    fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Produces frames for one camera.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Capture the frame presented at `timestamp_ms` on the media timeline.
    fn next_frame(&mut self, timestamp_ms: f64) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source behind a camera url.
pub fn open_source(camera: &Camera, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    if camera.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(camera.id, &camera.url, width, height)));
    }
    Err(anyhow!(
        "camera {} source {} needs an external decoder; only stub:// sources are built in",
        camera.id,
        camera.url
    ))
}

/// Synthetic source (stub://) producing a slowly shifting gradient.
pub struct SyntheticSource {
    camera_id: CameraId,
    url: String,
    width: u32,
    height: u32,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(camera_id: CameraId, url: &str, width: u32, height: u32) -> Self {
        Self {
            camera_id,
            url: url.to_string(),
            width,
            height,
            frame_count: 0,
            connected: false,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize);
        let shift = self.frame_count + u64::from(self.camera_id.0) * 64;
        (0..pixel_count)
            .map(|i| ((i as u64 / 4 + shift) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("camera {}: connected to {} (synthetic)", self.camera_id, self.url);
        Ok(())
    }

    fn next_frame(&mut self, timestamp_ms: f64) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("camera {} source not connected", self.camera_id));
        }
        self.frame_count += 1;
        Ok(Frame::new(
            self.camera_id,
            self.width,
            self.height,
            timestamp_ms,
            self.frame_count,
            self.generate_pixels(),
        ))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_requires_connect() {
        let camera = Camera::new(0, "yard", "stub://yard");
        let mut source = open_source(&camera, 32, 16).unwrap();
        assert!(source.next_frame(0.0).is_err());
        source.connect().unwrap();
        let frame = source.next_frame(40.0).unwrap();
        assert_eq!(frame.pixels().len(), 32 * 16);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.timestamp_ms(), 40.0);
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn network_sources_need_external_decoder() {
        let camera = Camera::new(1, "door", "rtsp://10.0.0.5/stream");
        assert!(open_source(&camera, 32, 16).is_err());
    }
}
