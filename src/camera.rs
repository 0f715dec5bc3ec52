//! Configured camera feeds.
//!
//! Cameras are created once at startup from configuration and never mutated
//! afterwards. Everything else in the crate refers to them by `CameraId`.

use anyhow::{anyhow, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maximum number of simultaneously combined camera feeds.
pub const MAX_CAMERAS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts a number or a numeric string. JSON object keys are always
/// strings, and buffered (tagged) payloads do not coerce them back.
impl<'de> Deserialize<'de> for CameraId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = CameraId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a camera id")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<CameraId, E> {
                u32::try_from(v)
                    .map(CameraId)
                    .map_err(|_| E::custom(format!("camera id {} out of range", v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<CameraId, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(format!("camera id {} out of range", v)))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CameraId, E> {
                v.trim()
                    .parse()
                    .map(CameraId)
                    .map_err(|_| E::custom(format!("invalid camera id '{}'", v)))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    /// Source locator (rtsp://, rtmp://, or stub:// for synthetic feeds).
    pub url: String,
    pub enabled: bool,
}

impl Camera {
    pub fn new(id: u32, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: CameraId(id),
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }
}

/// Immutable set of configured cameras, ordered by id.
#[derive(Clone, Debug, Default)]
pub struct CameraSet {
    cameras: Vec<Camera>,
}

impl CameraSet {
    pub fn new(mut cameras: Vec<Camera>) -> Result<Self> {
        cameras.sort_by_key(|camera| camera.id);
        let mut seen = BTreeSet::new();
        for camera in &cameras {
            if !seen.insert(camera.id) {
                return Err(anyhow!("duplicate camera id {}", camera.id));
            }
            if camera.url.trim().is_empty() {
                return Err(anyhow!("camera {} has an empty source url", camera.id));
            }
        }
        let enabled = cameras.iter().filter(|camera| camera.enabled).count();
        if enabled == 0 {
            return Err(anyhow!("at least one camera must be enabled"));
        }
        if enabled > MAX_CAMERAS {
            return Err(anyhow!(
                "{} cameras enabled, at most {} can be combined",
                enabled,
                MAX_CAMERAS
            ));
        }
        Ok(Self { cameras })
    }

    pub fn get(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.iter().find(|camera| camera.id == id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Camera> {
        self.cameras.iter().filter(|camera| camera.enabled)
    }

    pub fn enabled_ids(&self) -> Vec<CameraId> {
        self.enabled().map(|camera| camera.id).collect()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
