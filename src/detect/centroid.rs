//! Nearest-centroid association of detections across frames.

use crate::camera::CameraId;

use super::result::{Detection, LocalTrack};

/// Tracks not matched for this many frames are forgotten.
const MAX_MISSED_FRAMES: u32 = 5;

struct Slot {
    track: LocalTrack,
    missed: u32,
}

/// Greedy centroid tracker used by backends without a tracker of their own.
pub struct CentroidTracker {
    max_distance: f64,
    slots: Vec<Slot>,
    next_id: u64,
}

impl CentroidTracker {
    pub fn new(max_distance: f64) -> Self {
        Self {
            max_distance,
            slots: Vec::new(),
            next_id: 1,
        }
    }

    pub fn update(&mut self, camera: CameraId, detections: &[Detection]) -> Vec<LocalTrack> {
        let mut pairs = Vec::new();
        for (si, slot) in self.slots.iter().enumerate() {
            let prev = slot.track.bbox.center();
            for (di, det) in detections.iter().enumerate() {
                let d = prev.distance(&det.bbox.center());
                if d <= self.max_distance {
                    pairs.push((d, si, di));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut slot_taken = vec![false; self.slots.len()];
        let mut det_taken = vec![false; detections.len()];
        for (_, si, di) in pairs {
            if slot_taken[si] || det_taken[di] {
                continue;
            }
            slot_taken[si] = true;
            det_taken[di] = true;
            let slot = &mut self.slots[si];
            let det = &detections[di];
            slot.track.bbox = det.bbox;
            slot.track.confidence = det.confidence;
            slot.track.class = det.class;
            slot.track.age += 1;
            slot.missed = 0;
        }

        for (slot, taken) in self.slots.iter_mut().zip(&slot_taken) {
            if !taken {
                slot.missed += 1;
            }
        }
        self.slots.retain(|slot| slot.missed <= MAX_MISSED_FRAMES);

        for (det, taken) in detections.iter().zip(&det_taken) {
            if *taken {
                continue;
            }
            let track_id = format!("cam{}_{}", camera.0, self.next_id);
            self.next_id += 1;
            self.slots.push(Slot {
                track: LocalTrack {
                    camera_id: camera,
                    track_id,
                    bbox: det.bbox,
                    confidence: det.confidence,
                    class: det.class,
                    age: 1,
                },
                missed: 0,
            });
        }

        // Report only tracks observed on this frame.
        self.slots
            .iter()
            .filter(|slot| slot.missed == 0)
            .map(|slot| slot.track.clone())
            .collect()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, ObjectClass};

    fn det(x: f64) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, 100.0, 20.0, 60.0),
            confidence: 0.9,
            class: ObjectClass::Person,
        }
    }

    #[test]
    fn keeps_ids_for_small_motion() {
        let mut tracker = CentroidTracker::new(50.0);
        let first = tracker.update(CameraId(0), &[det(100.0), det(300.0)]);
        let second = tracker.update(CameraId(0), &[det(310.0), det(105.0)]);
        assert_eq!(first.len(), 2);
        let id_at = |tracks: &[LocalTrack], x: f64| {
            tracks
                .iter()
                .find(|t| (t.bbox.x - x).abs() < 1.0)
                .map(|t| t.track_id.clone())
        };
        assert_eq!(id_at(&first, 100.0), id_at(&second, 105.0));
        assert_eq!(id_at(&first, 300.0), id_at(&second, 310.0));
        assert!(second.iter().all(|t| t.age == 2));
    }

    #[test]
    fn large_jump_starts_new_track() {
        let mut tracker = CentroidTracker::new(50.0);
        let first = tracker.update(CameraId(1), &[det(100.0)]);
        let second = tracker.update(CameraId(1), &[det(400.0)]);
        assert_ne!(first[0].track_id, second[0].track_id);
        assert_eq!(second[0].track_id, "cam1_2");
    }
}
