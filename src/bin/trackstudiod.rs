//! trackstudiod - multi-camera tracking daemon.
//!
//! Captures every configured camera, runs per-camera tracking, projects the
//! tracks onto the calibrated ground plane, fuses them and publishes one
//! `vision_metadata` tick per cycle to every viewer that started a combined
//! stream on the signaling port.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use trackstudio::calibration::{CalibrationRecord, CalibrationStore, Calibrator, PointPair};
use trackstudio::delay::MAX_DELAY_MS;
use trackstudio::signaling::SyntheticAnswerer;
use trackstudio::sync::SampleBuffer;
use trackstudio::{
    open_source, CameraId, Frame, FrameSource, MetadataPublisher, SignalingServer, StreamDelays,
    TrackerRegistry, TrackstudioConfig, VisionProcessor, VisionStatus,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera ground-plane tracking daemon")]
struct Args {
    /// Signaling listen address (overrides the config file).
    #[arg(long, env = "TRACKSTUDIO_SIGNALING_ADDR")]
    signaling_addr: Option<String>,

    /// JSON file mapping camera ids to four calibration point pairs.
    /// Applied and persisted before the daemon starts.
    #[arg(long, value_name = "FILE")]
    calibrate: Option<PathBuf>,

    /// Delete persisted calibration before starting.
    #[arg(long)]
    reset_calibration: bool,

    /// Stop after this many vision ticks.
    #[arg(long)]
    ticks: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = TrackstudioConfig::load()?;
    if let Some(addr) = args.signaling_addr {
        config.signaling.addr = addr;
    }
    let cameras = config.camera_set()?;

    let store = CalibrationStore::new(config.calibration_path.clone());
    if args.reset_calibration {
        store.clear()?;
    }
    let mut calibrator = Calibrator::new(config.canvas_size);
    calibrator.restore(&cameras, &store.load()?);

    let registry = TrackerRegistry::with_builtin();
    log::info!("available trackers: {:?}", registry.list());
    let mut processor = VisionProcessor::new(
        cameras.clone(),
        calibrator,
        &registry,
        &config.vision.tracker,
        config.fusion.clone(),
    )?;
    if let Some(path) = &args.calibrate {
        apply_calibration_file(&mut processor, &store, path)?;
    }
    for status in store.status(processor.cameras(), processor.calibrator())? {
        if !status.has_transform {
            log::warn!("camera {} is not calibrated", status.camera_id);
        }
    }

    let mut delays = StreamDelays::new(&cameras);
    delays.set_all(&config.stream_delays)?;

    let publisher = MetadataPublisher::new();
    let signaling = SignalingServer::new(
        config.signaling.clone(),
        Arc::new(SyntheticAnswerer),
        publisher.clone(),
    )
    .spawn()?;

    let mut sources: BTreeMap<CameraId, Box<dyn FrameSource>> = BTreeMap::new();
    for camera in cameras.enabled() {
        let mut source = open_source(camera, config.vision.width, config.vision.height)?;
        source
            .connect()
            .with_context(|| format!("camera {} ({}) failed to connect", camera.id, camera.name))?;
        sources.insert(camera.id, source);
    }

    // Enough history to reach back the largest allowed delay.
    let history_len = (f64::from(MAX_DELAY_MS) / 1000.0 * config.vision.fps).ceil() as usize + 2;
    let mut history: BTreeMap<CameraId, SampleBuffer<Frame>> = sources
        .keys()
        .map(|id| (*id, SampleBuffer::new(history_len)))
        .collect();

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "trackstudiod running: {} cameras at {} fps, signaling on {}",
        sources.len(),
        config.vision.fps,
        signaling.addr
    );

    let started = Instant::now();
    let interval = config.vision.tick_interval();
    let mut last_health_log = Instant::now();
    let mut ticks = 0u64;
    loop {
        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        for (camera, source) in sources.iter_mut() {
            match source.next_frame(now_ms) {
                Ok(frame) => {
                    if let Some(buffer) = history.get_mut(camera) {
                        buffer.push(frame);
                    }
                }
                Err(e) => log::warn!("camera {}: capture failed: {:#}", camera, e),
            }
        }

        let frames: Vec<Frame> = history
            .iter()
            .filter_map(|(camera, buffer)| delays.select_delayed(*camera, buffer, now_ms))
            .cloned()
            .collect();
        match processor.process(&frames, now_ms) {
            Ok(metadata) => {
                publisher.publish(&metadata)?;
            }
            Err(e) => log::error!("vision tick failed: {:#}", e),
        }
        ticks += 1;

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            for (camera, source) in &sources {
                let stats = source.stats();
                log::info!(
                    "camera {} health={} frames={} url={}",
                    camera,
                    source.is_healthy(),
                    stats.frames_captured,
                    stats.url
                );
            }
            let stats = processor.stats();
            log::info!(
                "vision ticks={} last={:.2}ms tracks={} created={} expired={} subscribers={}",
                stats.ticks,
                stats.last_processing_ms,
                stats.fusion.active_tracks,
                stats.fusion.total_created,
                stats.fusion.total_expired,
                publisher.subscriber_count()?
            );
            publisher.publish_status(&VisionStatus {
                timestamp: SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64(),
                tracking_enabled: processor.calibrator().is_complete(processor.cameras()),
                active_stream_ids: processor.cameras().enabled_ids(),
                message: format!("{} ticks processed", stats.ticks),
            })?;
            last_health_log = Instant::now();
        }

        if args.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    log::info!("trackstudiod shutting down after {} ticks", ticks);
    signaling.stop()?;
    Ok(())
}

fn apply_calibration_file(
    processor: &mut VisionProcessor,
    store: &CalibrationStore,
    path: &Path,
) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read calibration points {}", path.display()))?;
    let document: BTreeMap<String, Vec<PointPair>> = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid calibration points {}: {}", path.display(), e))?;
    let canvas_size = processor.calibrator().canvas_size();
    for (key, pairs) in document {
        let camera = CameraId(
            key.trim()
                .parse()
                .map_err(|_| anyhow!("calibration key '{}' is not a camera id", key))?,
        );
        let transform = processor
            .calibrate(camera, &pairs)
            .map_err(|e| anyhow!("camera {}: {}", camera, e))?;
        store.save(camera, CalibrationRecord::new(&transform, &pairs, canvas_size)?)?;
        log::info!("camera {} calibrated from {}", camera, path.display());
    }
    Ok(())
}
