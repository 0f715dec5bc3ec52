//! Timestamp synchronization of video frames and vision metadata.
//!
//! Both streams are keyed on the session's media timeline in milliseconds.
//! Every insertion first advances a logical watermark (the newest timestamp
//! seen from either side) and prunes samples older than `max_age_ms` behind
//! it, then tries to pair the new sample with the closest opposite sample
//! within `tolerance_ms`. A matched sample is removed, so nothing is paired
//! twice.

mod buffer;

pub use buffer::{SampleBuffer, Timestamped};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metadata::VisionMetadata;

pub const DEFAULT_TOLERANCE_MS: f64 = 150.0;
pub const DEFAULT_CAPACITY: usize = 30;
pub const DEFAULT_MAX_AGE_MS: f64 = 1000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub tolerance_ms: f64,
    pub capacity: usize,
    pub max_age_ms: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            capacity: DEFAULT_CAPACITY,
            max_age_ms: DEFAULT_MAX_AGE_MS,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1.0..=200.0).contains(&self.tolerance_ms) {
            bail!("sync tolerance must be within 1..=200 ms, got {}", self.tolerance_ms);
        }
        if !(1..=1024).contains(&self.capacity) {
            bail!("sync buffer capacity must be within 1..=1024, got {}", self.capacity);
        }
        if !(self.tolerance_ms..=5000.0).contains(&self.max_age_ms) {
            bail!(
                "sync max age must be between the tolerance ({} ms) and 5000 ms, got {}",
                self.tolerance_ms,
                self.max_age_ms
            );
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoFrameSample {
    /// Wall-clock receipt time.
    pub received_at_ms: f64,
    /// Source-relative playback position.
    pub media_time_ms: f64,
}

impl VideoFrameSample {
    pub fn new(received_at_ms: f64, media_time_ms: f64) -> Self {
        Self {
            received_at_ms,
            media_time_ms,
        }
    }
}

impl Timestamped for VideoFrameSample {
    fn timestamp_ms(&self) -> f64 {
        self.media_time_ms
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisionMetadataSample {
    pub timestamp_ms: f64,
    pub metadata: Arc<VisionMetadata>,
}

impl VisionMetadataSample {
    pub fn new(metadata: impl Into<Arc<VisionMetadata>>) -> Self {
        let metadata = metadata.into();
        Self {
            timestamp_ms: metadata.media_time_ms(),
            metadata,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.metadata.frame_id
    }

    pub fn processing_time_ms(&self) -> f64 {
        self.metadata.processing_time_ms
    }
}

impl Timestamped for VisionMetadataSample {
    fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncedPair {
    pub video: VideoFrameSample,
    pub metadata: VisionMetadataSample,
    /// Metadata time minus video time.
    pub delta_ms: f64,
}

impl SyncedPair {
    fn new(video: VideoFrameSample, metadata: VisionMetadataSample) -> Self {
        let delta_ms = metadata.timestamp_ms - video.media_time_ms;
        Self {
            video,
            metadata,
            delta_ms,
        }
    }

    pub fn abs_delta_ms(&self) -> f64 {
        self.delta_ms.abs()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    Synced,
    /// Latest known metadata shown without a timestamp match.
    Fallback,
}

/// What the presentation layer draws on top of a video frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub mode: OverlayMode,
    pub video: VideoFrameSample,
    pub metadata: VisionMetadataSample,
    pub delta_ms: f64,
}

impl From<SyncedPair> for Overlay {
    fn from(pair: SyncedPair) -> Self {
        Self {
            mode: OverlayMode::Synced,
            video: pair.video,
            metadata: pair.metadata,
            delta_ms: pair.delta_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    Matched(SyncedPair),
    Buffered,
    /// Already older than the max age; dropped on arrival.
    Stale,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub video_received: u64,
    pub metadata_received: u64,
    pub synced_pairs: u64,
    pub fallback_overlays: u64,
    pub stale_dropped: u64,
    pub evicted: u64,
}

pub struct Synchronizer {
    config: SyncConfig,
    video: SampleBuffer<VideoFrameSample>,
    metadata: SampleBuffer<VisionMetadataSample>,
    watermark_ms: Option<f64>,
    latest_metadata: Option<VisionMetadataSample>,
    last_delta_ms: Option<f64>,
    stats: SyncStats,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            video: SampleBuffer::new(config.capacity),
            metadata: SampleBuffer::new(config.capacity),
            config,
            watermark_ms: None,
            latest_metadata: None,
            last_delta_ms: None,
            stats: SyncStats::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn add_video_frame(&mut self, sample: VideoFrameSample) -> SyncOutcome {
        self.stats.video_received += 1;
        let ts = sample.media_time_ms;
        if !self.advance(ts) {
            return SyncOutcome::Stale;
        }
        match self.metadata.take_closest(ts, self.config.tolerance_ms) {
            Some(metadata) => self.matched(SyncedPair::new(sample, metadata)),
            None => {
                if self.video.push(sample).is_some() {
                    self.stats.evicted += 1;
                }
                SyncOutcome::Buffered
            }
        }
    }

    pub fn add_vision_metadata(&mut self, sample: VisionMetadataSample) -> SyncOutcome {
        self.stats.metadata_received += 1;
        let ts = sample.timestamp_ms;
        if !self.advance(ts) {
            return SyncOutcome::Stale;
        }
        let newer = self
            .latest_metadata
            .as_ref()
            .map_or(true, |latest| latest.timestamp_ms <= ts);
        if newer {
            self.latest_metadata = Some(sample.clone());
        }
        match self.video.take_closest(ts, self.config.tolerance_ms) {
            Some(video) => self.matched(SyncedPair::new(video, sample)),
            None => {
                if self.metadata.push(sample).is_some() {
                    self.stats.evicted += 1;
                }
                SyncOutcome::Buffered
            }
        }
    }

    /// Add a frame that is about to be shown and return what to draw over it:
    /// the matched metadata if there is one, otherwise the best-effort fallback.
    pub fn present_video_frame(&mut self, sample: VideoFrameSample) -> Option<Overlay> {
        match self.add_video_frame(sample) {
            SyncOutcome::Matched(pair) => Some(pair.into()),
            SyncOutcome::Buffered | SyncOutcome::Stale => {
                let overlay = self.fallback_overlay(&sample);
                if overlay.is_some() {
                    self.stats.fallback_overlays += 1;
                }
                overlay
            }
        }
    }

    /// Latest known metadata marked as unsynced, if it is not older than the
    /// max age relative to `video`.
    pub fn fallback_overlay(&self, video: &VideoFrameSample) -> Option<Overlay> {
        let latest = self.latest_metadata.as_ref()?;
        let delta_ms = latest.timestamp_ms - video.media_time_ms;
        if delta_ms.abs() > self.config.max_age_ms {
            return None;
        }
        Some(Overlay {
            mode: OverlayMode::Fallback,
            video: *video,
            metadata: latest.clone(),
            delta_ms,
        })
    }

    /// Drop every buffered sample and forget the timeline.
    pub fn flush(&mut self) {
        self.video.clear();
        self.metadata.clear();
        self.watermark_ms = None;
        self.latest_metadata = None;
        self.last_delta_ms = None;
        self.stats = SyncStats::default();
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn last_delta_ms(&self) -> Option<f64> {
        self.last_delta_ms
    }

    pub fn buffered_video(&self) -> usize {
        self.video.len()
    }

    pub fn buffered_metadata(&self) -> usize {
        self.metadata.len()
    }

    pub fn watermark_ms(&self) -> Option<f64> {
        self.watermark_ms
    }

    /// Move the watermark forward and prune both buffers behind it.
    /// Returns false when `ts` itself is already too old.
    fn advance(&mut self, ts: f64) -> bool {
        let watermark = self.watermark_ms.map_or(ts, |w| w.max(ts));
        self.watermark_ms = Some(watermark);
        let cutoff = watermark - self.config.max_age_ms;

        let dropped = self.video.prune_before(cutoff) + self.metadata.prune_before(cutoff);
        if dropped > 0 {
            log::debug!("sync: dropped {} samples older than {:.0} ms", dropped, cutoff);
        }
        self.stats.stale_dropped += dropped as u64;

        if ts < cutoff {
            self.stats.stale_dropped += 1;
            log::debug!("sync: sample at {:.0} ms arrived stale", ts);
            return false;
        }
        true
    }

    fn matched(&mut self, pair: SyncedPair) -> SyncOutcome {
        self.stats.synced_pairs += 1;
        self.last_delta_ms = Some(pair.delta_ms);
        SyncOutcome::Matched(pair)
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}
