use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::{DEFAULT_CALIBRATION_PATH, DEFAULT_CANVAS_SIZE};
use crate::camera::{Camera, CameraId, CameraSet};
use crate::delay::MAX_DELAY_MS;
use crate::frame::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::fusion::FusionConfig;
use crate::session::SessionConfig;
use crate::signaling::{SignalingConfig, DEFAULT_SIGNALING_ADDR};
use crate::sync::SyncConfig;

const DEFAULT_TRACKER: &str = "stub";
const DEFAULT_VISION_FPS: f64 = 10.0;
const MAX_VISION_FPS: f64 = 60.0;
const MAX_CANVAS_SIZE: f64 = 10_000.0;

#[derive(Debug, Deserialize, Default)]
struct TrackstudioConfigFile {
    signaling: Option<SignalingConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
    sync: Option<SyncConfigFile>,
    fusion: Option<FusionConfigFile>,
    session: Option<SessionConfigFile>,
    vision: Option<VisionConfigFile>,
    /// Keyed by camera id.
    stream_delays: Option<BTreeMap<String, u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct SignalingConfigFile {
    addr: Option<String>,
    keepalive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    path: Option<PathBuf>,
    canvas_size: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: u32,
    name: Option<String>,
    url: String,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SyncConfigFile {
    tolerance_ms: Option<f64>,
    capacity: Option<usize>,
    max_age_ms: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    distance_threshold: Option<f64>,
    expiry_ticks: Option<u32>,
    trajectory_capacity: Option<usize>,
    velocity_alpha: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    connect_timeout_ms: Option<u64>,
    negotiate_timeout_ms: Option<u64>,
    media_warning_ms: Option<u64>,
    media_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VisionConfigFile {
    tracker: Option<String>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TrackstudioConfig {
    pub signaling: SignalingConfig,
    pub calibration_path: PathBuf,
    pub canvas_size: f64,
    pub cameras: Vec<Camera>,
    pub sync: SyncConfig,
    pub fusion: FusionConfig,
    pub session: SessionConfig,
    pub vision: VisionSettings,
    pub stream_delays: BTreeMap<CameraId, u32>,
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub tracker: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl VisionSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

impl TrackstudioConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRACKSTUDIO_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Builds the validated camera set.
    pub fn camera_set(&self) -> Result<CameraSet> {
        CameraSet::new(self.cameras.clone())
    }

    fn from_file(file: TrackstudioConfigFile) -> Result<Self> {
        let defaults = SessionConfig::default();
        let signaling_file = file.signaling.unwrap_or_default();
        let signaling = SignalingConfig {
            addr: signaling_file
                .addr
                .unwrap_or_else(|| DEFAULT_SIGNALING_ADDR.to_string()),
            keepalive: signaling_file
                .keepalive_secs
                .map(Duration::from_secs)
                .unwrap_or(SignalingConfig::default().keepalive),
        };

        let calibration = file.calibration.unwrap_or_default();
        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .map(|camera| Camera {
                    id: CameraId(camera.id),
                    name: camera
                        .name
                        .unwrap_or_else(|| format!("Camera {}", camera.id)),
                    url: camera.url,
                    enabled: camera.enabled.unwrap_or(true),
                })
                .collect(),
            None => default_cameras(),
        };

        let sync_file = file.sync.unwrap_or_default();
        let sync_defaults = SyncConfig::default();
        let sync = SyncConfig {
            tolerance_ms: sync_file.tolerance_ms.unwrap_or(sync_defaults.tolerance_ms),
            capacity: sync_file.capacity.unwrap_or(sync_defaults.capacity),
            max_age_ms: sync_file.max_age_ms.unwrap_or(sync_defaults.max_age_ms),
        };

        let fusion_file = file.fusion.unwrap_or_default();
        let fusion_defaults = FusionConfig::default();
        let fusion = FusionConfig {
            distance_threshold: fusion_file
                .distance_threshold
                .unwrap_or(fusion_defaults.distance_threshold),
            expiry_ticks: fusion_file
                .expiry_ticks
                .unwrap_or(fusion_defaults.expiry_ticks),
            trajectory_capacity: fusion_file
                .trajectory_capacity
                .unwrap_or(fusion_defaults.trajectory_capacity),
            velocity_alpha: fusion_file
                .velocity_alpha
                .unwrap_or(fusion_defaults.velocity_alpha),
        };

        let session_file = file.session.unwrap_or_default();
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let session = SessionConfig {
            connect_timeout: millis(session_file.connect_timeout_ms, defaults.connect_timeout),
            negotiate_timeout: millis(
                session_file.negotiate_timeout_ms,
                defaults.negotiate_timeout,
            ),
            media_warning_after: millis(session_file.media_warning_ms, defaults.media_warning_after),
            media_timeout: millis(session_file.media_timeout_ms, defaults.media_timeout),
            max_retries: session_file.max_retries.unwrap_or(defaults.max_retries),
            retry_delay: millis(session_file.retry_delay_ms, defaults.retry_delay),
            stats_interval: defaults.stats_interval,
            sync: sync.clone(),
        };

        let vision_file = file.vision.unwrap_or_default();
        let vision = VisionSettings {
            tracker: vision_file
                .tracker
                .unwrap_or_else(|| DEFAULT_TRACKER.to_string()),
            fps: vision_file.fps.unwrap_or(DEFAULT_VISION_FPS),
            width: vision_file.width.unwrap_or(DEFAULT_WIDTH),
            height: vision_file.height.unwrap_or(DEFAULT_HEIGHT),
        };

        let mut stream_delays = BTreeMap::new();
        for (key, delay) in file.stream_delays.unwrap_or_default() {
            let id: u32 = key
                .trim()
                .parse()
                .map_err(|_| anyhow!("stream delay key '{}' is not a camera id", key))?;
            stream_delays.insert(CameraId(id), delay);
        }

        Ok(Self {
            signaling,
            calibration_path: calibration
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_PATH)),
            canvas_size: calibration.canvas_size.unwrap_or(DEFAULT_CANVAS_SIZE),
            cameras,
            sync,
            fusion,
            session,
            vision,
            stream_delays,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TRACKSTUDIO_SIGNALING_ADDR") {
            if !addr.trim().is_empty() {
                self.signaling.addr = addr;
            }
        }
        if let Ok(path) = std::env::var("TRACKSTUDIO_CALIBRATION_PATH") {
            if !path.trim().is_empty() {
                self.calibration_path = PathBuf::from(path);
            }
        }
        if let Ok(tracker) = std::env::var("TRACKSTUDIO_TRACKER") {
            if !tracker.trim().is_empty() {
                self.vision.tracker = tracker.trim().to_string();
            }
        }
        if let Ok(tolerance) = std::env::var("TRACKSTUDIO_SYNC_TOLERANCE_MS") {
            self.sync.tolerance_ms = tolerance.trim().parse().map_err(|_| {
                anyhow!("TRACKSTUDIO_SYNC_TOLERANCE_MS must be a number of milliseconds")
            })?;
            self.session.sync = self.sync.clone();
        }
        if let Ok(threshold) = std::env::var("TRACKSTUDIO_FUSION_THRESHOLD") {
            self.fusion.distance_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("TRACKSTUDIO_FUSION_THRESHOLD must be a distance in canvas pixels")
            })?;
        }
        if let Ok(ticks) = std::env::var("TRACKSTUDIO_FUSION_EXPIRY_TICKS") {
            self.fusion.expiry_ticks = ticks.trim().parse().map_err(|_| {
                anyhow!("TRACKSTUDIO_FUSION_EXPIRY_TICKS must be an integer tick count")
            })?;
        }
        if let Ok(fps) = std::env::var("TRACKSTUDIO_VISION_FPS") {
            self.vision.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("TRACKSTUDIO_VISION_FPS must be a number"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let cameras = self.camera_set()?;
        self.sync.validate()?;
        self.fusion.validate()?;
        self.session.validate()?;

        if !(self.canvas_size >= 1.0 && self.canvas_size <= MAX_CANVAS_SIZE) {
            bail!(
                "canvas size must be within 1..={}, got {}",
                MAX_CANVAS_SIZE,
                self.canvas_size
            );
        }
        if !(self.vision.fps > 0.0 && self.vision.fps <= MAX_VISION_FPS) {
            bail!(
                "vision fps must be within (0, {}], got {}",
                MAX_VISION_FPS,
                self.vision.fps
            );
        }
        if self.vision.width == 0 || self.vision.height == 0 {
            bail!("vision frame size must be non-zero");
        }
        self.signaling
            .addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid signaling address '{}': {}", self.signaling.addr, e))?;
        if self.signaling.keepalive.is_zero() {
            bail!("signaling keep-alive must be non-zero");
        }

        for (camera, delay) in &self.stream_delays {
            if cameras.get(*camera).is_none() {
                bail!("stream delay configured for unknown camera {}", camera);
            }
            if *delay > MAX_DELAY_MS {
                bail!(
                    "stream delay for camera {} must be within 0..={} ms, got {}",
                    camera,
                    MAX_DELAY_MS,
                    delay
                );
            }
        }
        Ok(())
    }
}

fn default_cameras() -> Vec<Camera> {
    vec![
        Camera::new(0, "Camera 0", "stub://camera0"),
        Camera::new(1, "Camera 1", "stub://camera1"),
    ]
}

fn read_config_file(path: &Path) -> Result<TrackstudioConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
