use serde::{Deserialize, Serialize};

use crate::calibration::Point2;
use crate::camera::CameraId;

/// Axis-aligned box in image pixels, anchored at its top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Point2 {
        Point2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Where the object touches the ground. This is the point that gets
    /// projected into the bird's-eye view.
    pub fn bottom_center(&self) -> Point2 {
        Point2::new(self.x + self.w / 2.0, self.y + self.h)
    }

    /// `[x1, y1, x2, y2]` corner form used on the wire.
    pub fn corners(&self) -> [f64; 4] {
        [self.x, self.y, self.x + self.w, self.y + self.h]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: ObjectClass,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Package,
    Unknown,
}

impl ObjectClass {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Animal => "animal",
            ObjectClass::Package => "package",
            ObjectClass::Unknown => "unknown",
        }
    }

    /// Numeric class id reported alongside the name.
    pub fn id(&self) -> u32 {
        match self {
            ObjectClass::Person => 0,
            ObjectClass::Vehicle => 2,
            ObjectClass::Animal => 16,
            ObjectClass::Package => 24,
            ObjectClass::Unknown => 255,
        }
    }
}

/// A detection carried forward across frames of a single camera.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalTrack {
    pub camera_id: CameraId,
    /// Unique within the camera only.
    pub track_id: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: ObjectClass,
    /// Consecutive frames this track has been observed.
    pub age: u32,
}

impl LocalTrack {
    pub fn reference_point(&self) -> Point2 {
        self.bbox.bottom_center()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_center_is_ground_contact() {
        let b = BoundingBox::new(100.0, 50.0, 40.0, 120.0);
        assert_eq!(b.bottom_center(), Point2::new(120.0, 170.0));
        assert_eq!(b.center(), Point2::new(120.0, 110.0));
        assert_eq!(b.corners(), [100.0, 50.0, 140.0, 170.0]);
    }
}
