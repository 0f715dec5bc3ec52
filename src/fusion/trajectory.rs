use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
}

impl From<[f64; 3]> for TrajectoryPoint {
    fn from(v: [f64; 3]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            timestamp_ms: v[2],
        }
    }
}

impl From<TrajectoryPoint> for [f64; 3] {
    fn from(p: TrajectoryPoint) -> Self {
        [p.x, p.y, p.timestamp_ms]
    }
}

/// Fixed-capacity ring of ground positions; the oldest entry drops first.
///
/// Velocity is an exponential moving average of the step velocities;
/// `velocity_alpha` is the weight of the newest step.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    points: VecDeque<TrajectoryPoint>,
    capacity: usize,
    velocity_alpha: f64,
    velocity: Option<(f64, f64)>,
}

impl Trajectory {
    pub fn new(capacity: usize, velocity_alpha: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            velocity_alpha: velocity_alpha.clamp(0.0, 1.0),
            velocity: None,
        }
    }

    pub fn push(&mut self, x: f64, y: f64, timestamp_ms: f64) {
        if let Some(prev) = self.points.back() {
            let dt = (timestamp_ms - prev.timestamp_ms) / 1000.0;
            if dt > 0.0 {
                let step = ((x - prev.x) / dt, (y - prev.y) / dt);
                let a = self.velocity_alpha;
                self.velocity = Some(match self.velocity {
                    None => step,
                    Some((vx, vy)) => (a * step.0 + (1.0 - a) * vx, a * step.1 + (1.0 - a) * vy),
                });
            }
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(TrajectoryPoint { x, y, timestamp_ms });
    }

    pub fn last(&self) -> Option<&TrajectoryPoint> {
        self.points.back()
    }

    /// Smoothed ground velocity in canonical pixels per second.
    pub fn velocity(&self) -> (f64, f64) {
        self.velocity.unwrap_or((0.0, 0.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<TrajectoryPoint> {
        self.points.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity() {
        let mut t = Trajectory::new(3, 0.5);
        for i in 0..10 {
            t.push(i as f64, 0.0, i as f64 * 100.0);
            assert!(t.len() <= 3);
        }
        let xs: Vec<f64> = t.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn first_step_sets_velocity() {
        let mut t = Trajectory::new(8, 0.5);
        assert_eq!(t.velocity(), (0.0, 0.0));
        t.push(100.0, 100.0, 1000.0);
        t.push(110.0, 95.0, 1500.0);
        assert_eq!(t.velocity(), (20.0, -10.0));
    }

    #[test]
    fn later_steps_are_smoothed_by_alpha() {
        let mut smooth = Trajectory::new(8, 0.25);
        let mut raw = Trajectory::new(8, 1.0);
        for (x, ts) in [(0.0, 0.0), (10.0, 1000.0), (50.0, 2000.0)] {
            smooth.push(x, 0.0, ts);
            raw.push(x, 0.0, ts);
        }
        assert_eq!(raw.velocity(), (40.0, 0.0));
        assert_eq!(smooth.velocity(), (17.5, 0.0));
    }

    #[test]
    fn repeated_timestamp_keeps_velocity() {
        let mut t = Trajectory::new(8, 0.5);
        t.push(0.0, 0.0, 0.0);
        t.push(10.0, 0.0, 1000.0);
        t.push(99.0, 0.0, 1000.0);
        assert_eq!(t.velocity(), (10.0, 0.0));
    }
}
