//! TrackStudio
//!
//! Multi-camera ground-plane tracking with synchronized combined-stream
//! sessions.
//!
//! # Architecture
//!
//! Each camera is calibrated into a shared bird's-eye view. Every vision
//! tick, per-camera local tracks are projected onto that ground plane and
//! fused into global tracks. The resulting metadata is published to viewers
//! over the signaling connection, where a session state machine pairs it
//! with the video timeline before presentation.
//!
//! # Module Structure
//!
//! - `camera`: Configured feeds (Camera, CameraSet)
//! - `calibration`: Four-point homographies and their persistence
//! - `detect`: Tracker capability trait, registry and the stub backend
//! - `frame`: Decoded frames and frame sources
//! - `fusion`: Cross-camera global tracks
//! - `pipeline`: Per-tick detect, track, project, fuse
//! - `metadata`: The `vision_metadata` payload
//! - `sync`: Video/metadata timestamp matching
//! - `session`: Combined-stream session state machine and runtime
//! - `signaling`: Wire messages, signaling server and client transport
//! - `delay`: Per-stream presentation delays
//! - `config`: Daemon configuration

pub mod calibration;
pub mod camera;
pub mod config;
pub mod delay;
pub mod detect;
pub mod frame;
pub mod fusion;
pub mod metadata;
pub mod pipeline;
pub mod session;
pub mod signaling;
pub mod sync;

pub use calibration::{
    CalibrationError, CalibrationRecord, CalibrationStore, Calibrator, Homography, Point2,
    PointPair,
};
pub use camera::{Camera, CameraId, CameraSet};
pub use config::TrackstudioConfig;
pub use delay::StreamDelays;
pub use detect::{Detection, LocalTrack, TrackerBackend, TrackerRegistry};
pub use frame::{open_source, Frame, FrameSource};
pub use fusion::{FusionConfig, FusionEngine, GlobalTrack, GroundObservation};
pub use metadata::{BevTrack, VisionMetadata, VisionStatus};
pub use pipeline::{ProcessorStats, VisionProcessor};
pub use session::{
    CombinedSession, ErrorKind, SessionConfig, SessionError, SessionRuntime, SessionState,
};
pub use signaling::{ClientMessage, MetadataPublisher, ServerMessage, SignalingServer};
pub use sync::{Overlay, SyncConfig, SyncedPair, Synchronizer};
