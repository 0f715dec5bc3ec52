//! Planar homography estimation from four point correspondences.

use nalgebra::{Matrix3, SMatrix, Vector3};
use serde::{Deserialize, Serialize};

use super::CalibrationError;

/// Determinants and projective scales below this are treated as singular.
const SINGULAR_EPS: f64 = 1e-12;
/// Relative area below which three points are considered collinear.
const COLLINEAR_EPS: f64 = 1e-9;
/// Points closer than this (in their own units) are considered coincident.
const DUPLICATE_EPS: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point2 {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Point2> for [f64; 2] {
    fn from(value: Point2) -> Self {
        [value.x, value.y]
    }
}

/// One image-point to ground-point correspondence.
///
/// Ground points are normalized to the unit square.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointPair {
    pub image: Point2,
    pub ground: Point2,
}

impl PointPair {
    pub const fn new(image: Point2, ground: Point2) -> Self {
        Self { image, ground }
    }
}

/// 3x3 projective transform from image pixels to canonical ground pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    m: Matrix3<f64>,
}

impl Homography {
    /// Normalized direct linear transform over exactly four correspondences.
    ///
    /// Ground points are scaled from the unit square into the canonical
    /// `canvas_size` x `canvas_size` domain, both point sets are Hartley
    /// normalized, and `A h = 0` is solved by SVD.
    pub fn from_pairs(pairs: &[PointPair], canvas_size: f64) -> Result<Self, CalibrationError> {
        validate_pairs(pairs)?;

        let image: Vec<Point2> = pairs.iter().map(|p| p.image).collect();
        let ground: Vec<Point2> = pairs
            .iter()
            .map(|p| Point2::new(p.ground.x * canvas_size, p.ground.y * canvas_size))
            .collect();
        let (image_n, t_image) = normalize_points(&image).ok_or(CalibrationError::Singular)?;
        let (ground_n, t_ground) = normalize_points(&ground).ok_or(CalibrationError::Singular)?;

        // 8 equations padded to a square system so the SVD yields a full V.
        let mut a = SMatrix::<f64, 9, 9>::zeros();
        for (i, (p, q)) in image_n.iter().zip(ground_n.iter()).enumerate() {
            let (x, y, u, v) = (p.x, p.y, q.x, q.y);
            let (r0, r1) = (2 * i, 2 * i + 1);
            a[(r0, 0)] = -x;
            a[(r0, 1)] = -y;
            a[(r0, 2)] = -1.0;
            a[(r0, 6)] = u * x;
            a[(r0, 7)] = u * y;
            a[(r0, 8)] = u;
            a[(r1, 3)] = -x;
            a[(r1, 4)] = -y;
            a[(r1, 5)] = -1.0;
            a[(r1, 6)] = v * x;
            a[(r1, 7)] = v * y;
            a[(r1, 8)] = v;
        }

        let svd = a.svd(false, true);
        let v_t = svd.v_t.ok_or(CalibrationError::Singular)?;
        let h = v_t.row(svd.singular_values.imin());
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let t_ground_inv = t_ground.try_inverse().ok_or(CalibrationError::Singular)?;
        let mut m = t_ground_inv * h_norm * t_image;
        let scale = m[(2, 2)];
        if scale.abs() < SINGULAR_EPS {
            return Err(CalibrationError::Singular);
        }
        m /= scale;

        Self::checked(m)
    }

    /// Install an existing matrix after checking it is usable.
    pub fn from_matrix(m: [[f64; 3]; 3]) -> Result<Self, CalibrationError> {
        Self::checked(Matrix3::from_fn(|r, c| m[r][c]))
    }

    fn checked(m: Matrix3<f64>) -> Result<Self, CalibrationError> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite);
        }
        if m.determinant().abs() < SINGULAR_EPS || m.try_inverse().is_none() {
            return Err(CalibrationError::Singular);
        }
        Ok(Self { m })
    }

    pub fn matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.m[(0, 0)], self.m[(0, 1)], self.m[(0, 2)]],
            [self.m[(1, 0)], self.m[(1, 1)], self.m[(1, 2)]],
            [self.m[(2, 0)], self.m[(2, 1)], self.m[(2, 2)]],
        ]
    }

    /// Same transform with its ground output scaled by `factor`.
    ///
    /// Used to move a stored calibration into a different canvas size.
    pub fn rescaled(&self, factor: f64) -> Result<Self, CalibrationError> {
        let s = Matrix3::new(factor, 0.0, 0.0, 0.0, factor, 0.0, 0.0, 0.0, 1.0);
        Self::checked(s * self.m)
    }

    /// Map an image point into ground coordinates.
    ///
    /// Returns `None` for points on the vanishing line, which have no
    /// finite ground position.
    pub fn transform_point(&self, p: Point2) -> Option<Point2> {
        let g = self.m * Vector3::new(p.x, p.y, 1.0);
        if g.z.abs() < SINGULAR_EPS {
            return None;
        }
        let out = Point2::new(g.x / g.z, g.y / g.z);
        out.is_finite().then_some(out)
    }
}

/// Hartley normalization: zero centroid, mean distance sqrt(2).
fn normalize_points(points: &[Point2]) -> Option<(Vec<Point2>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean <= DUPLICATE_EPS {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, t))
}

fn validate_pairs(pairs: &[PointPair]) -> Result<(), CalibrationError> {
    if pairs.len() != 4 {
        return Err(CalibrationError::PointCount(pairs.len()));
    }
    for pair in pairs {
        if !pair.image.is_finite() || !pair.ground.is_finite() {
            return Err(CalibrationError::NonFinite);
        }
        if !(0.0..=1.0).contains(&pair.ground.x) || !(0.0..=1.0).contains(&pair.ground.y) {
            return Err(CalibrationError::GroundOutOfRange {
                x: pair.ground.x,
                y: pair.ground.y,
            });
        }
    }
    let image: Vec<Point2> = pairs.iter().map(|p| p.image).collect();
    let ground: Vec<Point2> = pairs.iter().map(|p| p.ground).collect();
    check_degenerate(&image, "image")?;
    check_degenerate(&ground, "ground")?;
    Ok(())
}

fn check_degenerate(points: &[Point2], plane: &'static str) -> Result<(), CalibrationError> {
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            if points[i].distance(&points[j]) <= DUPLICATE_EPS {
                return Err(CalibrationError::Duplicate { plane, a: i, b: j });
            }
        }
    }

    let scale = points
        .iter()
        .flat_map(|a| points.iter().map(move |b| a.distance(b)))
        .fold(0.0f64, f64::max);
    let tolerance = COLLINEAR_EPS * scale.max(1.0).powi(2);
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            for k in (j + 1)..points.len() {
                let (a, b, c) = (points[i], points[j], points[k]);
                let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
                if cross.abs() <= tolerance {
                    return Err(CalibrationError::Collinear {
                        plane,
                        points: [i, j, k],
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_pairs() -> Vec<PointPair> {
        vec![
            PointPair::new(Point2::new(100.0, 300.0), Point2::new(0.0, 0.0)),
            PointPair::new(Point2::new(620.0, 300.0), Point2::new(1.0, 0.0)),
            PointPair::new(Point2::new(700.0, 470.0), Point2::new(1.0, 1.0)),
            PointPair::new(Point2::new(20.0, 470.0), Point2::new(0.0, 1.0)),
        ]
    }

    #[test]
    fn identity_scaling_is_recovered() {
        let pairs = vec![
            PointPair::new(Point2::new(0.0, 0.0), Point2::new(0.0, 0.0)),
            PointPair::new(Point2::new(600.0, 0.0), Point2::new(1.0, 0.0)),
            PointPair::new(Point2::new(600.0, 600.0), Point2::new(1.0, 1.0)),
            PointPair::new(Point2::new(0.0, 600.0), Point2::new(0.0, 1.0)),
        ];
        let h = Homography::from_pairs(&pairs, 600.0).unwrap();
        let p = h.transform_point(Point2::new(150.0, 450.0)).unwrap();
        assert!((p.x - 150.0).abs() < 1e-6);
        assert!((p.y - 450.0).abs() < 1e-6);
    }

    #[test]
    fn perspective_pairs_round_trip() {
        let pairs = square_pairs();
        let h = Homography::from_pairs(&pairs, 600.0).unwrap();
        for pair in &pairs {
            let g = h.transform_point(pair.image).unwrap();
            assert!((g.x / 600.0 - pair.ground.x).abs() < 1e-3);
            assert!((g.y / 600.0 - pair.ground.y).abs() < 1e-3);
        }
    }

    #[test]
    fn rejects_wrong_count() {
        let pairs = &square_pairs()[..3];
        assert_eq!(
            Homography::from_pairs(pairs, 600.0).unwrap_err(),
            CalibrationError::PointCount(3)
        );
    }

    #[test]
    fn rejects_collinear_image_points() {
        let mut pairs = square_pairs();
        pairs[2].image = Point2::new(360.0, 300.0);
        assert!(matches!(
            Homography::from_pairs(&pairs, 600.0),
            Err(CalibrationError::Collinear { plane: "image", .. })
        ));
    }

    #[test]
    fn rejects_duplicate_ground_points() {
        let mut pairs = square_pairs();
        pairs[3].ground = pairs[0].ground;
        assert!(matches!(
            Homography::from_pairs(&pairs, 600.0),
            Err(CalibrationError::Duplicate { plane: "ground", .. })
        ));
    }

    #[test]
    fn rejects_ground_outside_unit_square() {
        let mut pairs = square_pairs();
        pairs[1].ground = Point2::new(1.5, 0.0);
        assert!(matches!(
            Homography::from_pairs(&pairs, 600.0),
            Err(CalibrationError::GroundOutOfRange { .. })
        ));
    }

    #[test]
    fn rescaled_transform_scales_ground_output() {
        let h = Homography::from_pairs(&square_pairs(), 600.0).unwrap();
        let big = h.rescaled(2.0).unwrap();
        let probe = Point2::new(360.0, 400.0);
        let a = h.transform_point(probe).unwrap();
        let b = big.transform_point(probe).unwrap();
        assert!((b.x - 2.0 * a.x).abs() < 1e-9);
        assert!((b.y - 2.0 * a.y).abs() < 1e-9);
    }

    #[test]
    fn stored_matrix_is_normalized_to_unit_corner() {
        let h = Homography::from_pairs(&square_pairs(), 600.0).unwrap();
        assert_eq!(h.matrix()[2][2], 1.0);
        assert_eq!(Homography::from_matrix(h.matrix()).unwrap(), h);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        assert_eq!(
            Homography::from_matrix([[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]])
                .unwrap_err(),
            CalibrationError::Singular
        );
    }
}
