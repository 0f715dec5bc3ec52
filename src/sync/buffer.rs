use std::collections::VecDeque;

/// Slack on the tolerance bound for float error in fractional timestamps.
const MATCH_EPS_MS: f64 = 1e-6;

/// A sample positioned on the shared media timeline.
pub trait Timestamped {
    fn timestamp_ms(&self) -> f64;
}

struct Entry<T> {
    seq: u64,
    sample: T,
}

/// Bounded buffer of samples kept ordered by timestamp.
///
/// Oldest samples sit at the front, so both capacity eviction and age
/// pruning pop from the front in amortized O(1).
pub struct SampleBuffer<T> {
    entries: VecDeque<Entry<T>>,
    capacity: usize,
    next_seq: u64,
}

impl<T: Timestamped> SampleBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// Insert a sample. Returns the sample evicted to respect capacity, if any.
    pub fn push(&mut self, sample: T) -> Option<T> {
        let ts = sample.timestamp_ms();
        let seq = self.next_seq;
        self.next_seq += 1;

        // Producers are mostly monotonic, so scan from the back.
        let pos = self
            .entries
            .iter()
            .rposition(|entry| entry.sample.timestamp_ms() <= ts)
            .map_or(0, |i| i + 1);
        self.entries.insert(pos, Entry { seq, sample });

        if self.entries.len() > self.capacity {
            return self.entries.pop_front().map(|entry| entry.sample);
        }
        None
    }

    /// Drop every sample with a timestamp strictly before `cutoff_ms`.
    pub fn prune_before(&mut self, cutoff_ms: f64) -> usize {
        let mut dropped = 0;
        while let Some(front) = self.entries.front() {
            if front.sample.timestamp_ms() < cutoff_ms {
                self.entries.pop_front();
                dropped += 1;
            } else {
                break;
            }
        }
        dropped
    }

    /// Remove and return the sample closest to `target_ms` within `tolerance_ms`.
    ///
    /// Equal distances are resolved in favour of the earliest arrival.
    pub fn take_closest(&mut self, target_ms: f64, tolerance_ms: f64) -> Option<T> {
        let mut best: Option<(usize, f64, u64)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let diff = (entry.sample.timestamp_ms() - target_ms).abs();
            if diff > tolerance_ms + MATCH_EPS_MS {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_diff, best_seq)) => {
                    diff < best_diff || (diff == best_diff && entry.seq < best_seq)
                }
            };
            if better {
                best = Some((i, diff, entry.seq));
            }
        }
        let (index, _, _) = best?;
        self.entries.remove(index).map(|entry| entry.sample)
    }

    pub fn oldest_ms(&self) -> Option<f64> {
        self.entries.front().map(|e| e.sample.timestamp_ms())
    }

    pub fn newest_ms(&self) -> Option<f64> {
        self.entries.back().map(|e| e.sample.timestamp_ms())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.sample)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
