use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::signaling::{ClientMessage, ServerMessage};
use crate::sync::{Overlay, SyncConfig, SyncOutcome, Synchronizer, VideoFrameSample, VisionMetadataSample};

use super::state::{ErrorKind, SessionError, SessionState};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MEDIA_WARNING: Duration = Duration::from_secs(10);
pub const DEFAULT_MEDIA_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub negotiate_timeout: Duration,
    /// Soft warning while waiting for the first frame.
    pub media_warning_after: Duration,
    /// Hard limit on waiting for the first frame.
    pub media_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub stats_interval: Duration,
    pub sync: SyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            negotiate_timeout: DEFAULT_NEGOTIATE_TIMEOUT,
            media_warning_after: DEFAULT_MEDIA_WARNING,
            media_timeout: DEFAULT_MEDIA_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            stats_interval: DEFAULT_STATS_INTERVAL,
            sync: SyncConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect timeout", self.connect_timeout),
            ("negotiate timeout", self.negotiate_timeout),
            ("media timeout", self.media_timeout),
            ("retry delay", self.retry_delay),
            ("stats interval", self.stats_interval),
        ] {
            if value.is_zero() {
                bail!("session {} must be non-zero", name);
            }
        }
        if self.media_warning_after >= self.media_timeout {
            bail!(
                "media warning ({:?}) must come before the media timeout ({:?})",
                self.media_warning_after,
                self.media_timeout
            );
        }
        self.sync.validate()
    }
}

/// Peer connection state reported by the media engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    Disconnected,
    Failed,
}

/// Identifies one signaling connection attempt of a session.
pub type LinkId = u64;

/// Signaling channel to the server.
pub trait SignalingTransport: Send {
    /// Begin the handshake without blocking. The server confirms with
    /// `connection_established`; every event the link produces must carry
    /// `link`.
    fn open(&mut self, link: LinkId) -> Result<()>;

    fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Must be safe to call repeatedly.
    fn close(&mut self);
}

/// Local half of the media negotiation.
pub trait MediaEngine: Send {
    fn create_offer(&mut self) -> Result<String>;

    fn apply_answer(&mut self, sdp: &str) -> Result<()>;

    /// Must be safe to call repeatedly.
    fn close(&mut self);
}

/// Receives everything the viewer should see.
pub trait PresentationSink: Send {
    fn state_changed(&mut self, from: &SessionState, to: &SessionState);

    fn overlay(&mut self, overlay: &Overlay);

    fn stats(&mut self, _stats: &SessionStats) {}

    fn warning(&mut self, _message: &str) {}
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Server {
        link: LinkId,
        message: ServerMessage,
    },
    SignalingClosed {
        link: LinkId,
        reason: String,
    },
    Peer(PeerState),
    VideoFrame(VideoFrameSample),
    VisionMetadata(VisionMetadataSample),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub metadata_received: u64,
    pub synced_pairs: u64,
    pub fallback_overlays: u64,
    pub stale_dropped: u64,
    pub fps: f64,
    pub last_delta_ms: Option<f64>,
    pub retry_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Timer {
    Connect,
    Negotiate,
    MediaWarning,
    Media,
    Retry,
    Stats,
}

#[derive(Default)]
struct Timers {
    armed: Vec<(Timer, Instant)>,
}

impl Timers {
    fn arm(&mut self, timer: Timer, at: Instant) {
        self.armed.retain(|(t, _)| *t != timer);
        self.armed.push((timer, at));
    }

    fn clear(&mut self) {
        self.armed.clear();
    }

    fn next(&self) -> Option<Instant> {
        self.armed.iter().map(|(_, at)| *at).min()
    }

    /// Remove and return the earliest timer due at `now`.
    fn take_due(&mut self, now: Instant) -> Option<Timer> {
        let index = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, (_, at))| *at <= now)
            .min_by_key(|(_, (_, at))| *at)
            .map(|(i, _)| i)?;
        Some(self.armed.remove(index).0)
    }
}

#[derive(Default)]
struct StatsWindow {
    last_report: Option<Instant>,
    frames_at_last_report: u64,
}

/// One viewer's combined stream session.
///
/// Every input is a discrete event carrying the current `Instant`; the
/// session never sleeps or spawns. Timeouts, the retry delay and the stats
/// tick are plain deadlines that `poll` fires once they are due. Any state
/// transition clears all pending deadlines, so a timer armed for a previous
/// state can never fire after the session has moved on.
pub struct CombinedSession {
    config: SessionConfig,
    state: SessionState,
    retry_count: u32,
    connection_id: Option<String>,
    answer_applied: bool,
    link: LinkId,
    transport: Box<dyn SignalingTransport>,
    media: Box<dyn MediaEngine>,
    sink: Box<dyn PresentationSink>,
    sync: Synchronizer,
    timers: Timers,
    window: StatsWindow,
}

impl CombinedSession {
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn SignalingTransport>,
        media: Box<dyn MediaEngine>,
        sink: Box<dyn PresentationSink>,
    ) -> Self {
        Self {
            sync: Synchronizer::new(config.sync.clone()),
            config,
            state: SessionState::Disconnected,
            retry_count: 0,
            connection_id: None,
            answer_applied: false,
            link: 0,
            transport,
            media,
            sink,
            timers: Timers::default(),
            window: StatsWindow::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Signaling link that events are currently accepted from.
    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// When `poll` next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next()
    }

    /// User start. Ignored while an attempt is already in flight.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state.is_active() {
            log::warn!("start ignored: session is {}", self.state);
            return false;
        }
        self.retry_count = 0;
        self.begin_attempt(now);
        true
    }

    /// User retry from the error state; resets the automatic retry budget.
    pub fn retry(&mut self, now: Instant) -> bool {
        if !matches!(self.state, SessionState::Error(_)) {
            log::warn!("retry ignored: session is {}", self.state);
            return false;
        }
        self.retry_count = 0;
        self.begin_attempt(now);
        true
    }

    /// Tear everything down and report `disconnected`. Idempotent.
    pub fn stop(&mut self, now: Instant) {
        if matches!(
            self.state,
            SessionState::Negotiating | SessionState::WaitingForMedia | SessionState::Streaming
        ) {
            if let Err(e) = self.transport.send(&ClientMessage::StopCombinedStream) {
                log::debug!("stop-combined-stream not delivered: {:#}", e);
            }
        }
        self.teardown();
        self.retry_count = 0;
        self.connection_id = None;
        self.transition(SessionState::Disconnected, now);
    }

    pub fn dispatch(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Server { link, .. } | SessionEvent::SignalingClosed { link, .. }
                if link != self.link =>
            {
                log::debug!("dropping event from stale signaling link {}", link);
            }
            SessionEvent::Server { message, .. } => self.on_server_message(message, now),
            SessionEvent::SignalingClosed { reason, .. } => self.fail(
                SessionError::new(
                    ErrorKind::Connection,
                    format!("signaling connection closed: {}", reason),
                    true,
                ),
                now,
            ),
            SessionEvent::Peer(peer) => self.on_peer_state(peer, now),
            SessionEvent::VideoFrame(sample) => self.on_video_frame(sample, now),
            SessionEvent::VisionMetadata(sample) => self.on_vision_metadata(sample),
        }
    }

    /// Fire every deadline that is due at `now`.
    pub fn poll(&mut self, now: Instant) {
        while let Some(timer) = self.timers.take_due(now) {
            self.fire(timer, now);
        }
    }

    fn fire(&mut self, timer: Timer, now: Instant) {
        match timer {
            Timer::Connect => self.fail(
                SessionError::new(
                    ErrorKind::Timeout,
                    format!(
                        "no connection confirmation within {} ms",
                        self.config.connect_timeout.as_millis()
                    ),
                    true,
                ),
                now,
            ),
            Timer::Negotiate => self.fail(
                SessionError::new(
                    ErrorKind::Timeout,
                    format!(
                        "negotiation did not complete within {} ms",
                        self.config.negotiate_timeout.as_millis()
                    ),
                    true,
                ),
                now,
            ),
            Timer::MediaWarning => {
                let message = format!(
                    "no media after {} ms, still waiting",
                    self.config.media_warning_after.as_millis()
                );
                log::warn!("{}", message);
                self.sink.warning(&message);
            }
            Timer::Media => self.fail(
                SessionError::new(
                    ErrorKind::Media,
                    format!(
                        "no media within {} ms",
                        self.config.media_timeout.as_millis()
                    ),
                    true,
                ),
                now,
            ),
            Timer::Retry => {
                if matches!(self.state, SessionState::Error(_)) {
                    self.retry_count += 1;
                    log::info!(
                        "automatic retry {}/{}",
                        self.retry_count,
                        self.config.max_retries
                    );
                    self.begin_attempt(now);
                }
            }
            Timer::Stats => {
                if self.state == SessionState::Streaming {
                    self.report_stats(now);
                    let interval = self.config.stats_interval.max(Duration::from_millis(1));
                    self.timers.arm(Timer::Stats, now + interval);
                }
            }
        }
    }

    fn on_server_message(&mut self, message: ServerMessage, now: Instant) {
        match message {
            ServerMessage::ConnectionEstablished { connection_id, .. } => {
                if self.state != SessionState::Connecting {
                    log::debug!("ignoring connection_established while {}", self.state);
                    return;
                }
                log::info!("signaling connected as {}", connection_id);
                self.connection_id = Some(connection_id);
                self.transition(SessionState::Negotiating, now);
                self.timers.arm(Timer::Negotiate, now + self.config.negotiate_timeout);
                if let Err(e) = self.send_offer() {
                    self.fail(e, now);
                }
            }
            ServerMessage::Answer { sdp } => {
                if self.state != SessionState::Negotiating {
                    log::debug!("ignoring answer while {}", self.state);
                    return;
                }
                match self.media.apply_answer(&sdp) {
                    Ok(()) => self.answer_applied = true,
                    Err(e) => self.fail(
                        SessionError::new(ErrorKind::Sdp, format!("{:#}", e), true),
                        now,
                    ),
                }
            }
            ServerMessage::Error {
                error_type,
                message,
                retryable,
            } => self.fail(
                SessionError::new(ErrorKind::from_wire(&error_type), message, retryable),
                now,
            ),
            ServerMessage::Ping => {
                if let Err(e) = self.transport.send(&ClientMessage::Pong) {
                    log::warn!("failed to answer keep-alive: {:#}", e);
                }
            }
            ServerMessage::VisionMetadata(metadata) => {
                self.on_vision_metadata(VisionMetadataSample::new(*metadata))
            }
            ServerMessage::Pong
            | ServerMessage::StreamStarted
            | ServerMessage::StreamStopped
            | ServerMessage::VisionStatus(_) => {
                log::debug!("signaling: {:?}", message);
            }
        }
    }

    fn on_peer_state(&mut self, peer: PeerState, now: Instant) {
        match peer {
            PeerState::Connected => {
                if self.state != SessionState::Negotiating {
                    return;
                }
                if !self.answer_applied {
                    log::debug!("peer connected before the answer was applied");
                }
                self.transition(SessionState::WaitingForMedia, now);
                self.timers
                    .arm(Timer::MediaWarning, now + self.config.media_warning_after);
                self.timers.arm(Timer::Media, now + self.config.media_timeout);
                if let Err(e) = self.transport.send(&ClientMessage::StartCombinedStream) {
                    self.fail(
                        SessionError::new(ErrorKind::Connection, format!("{:#}", e), true),
                        now,
                    );
                }
            }
            PeerState::Failed => self.fail(
                SessionError::new(ErrorKind::Ice, "peer connection failed", true),
                now,
            ),
            PeerState::Disconnected => {
                if matches!(
                    self.state,
                    SessionState::WaitingForMedia | SessionState::Streaming
                ) {
                    self.fail(
                        SessionError::new(ErrorKind::Connection, "peer connection lost", true),
                        now,
                    );
                }
            }
        }
    }

    fn on_video_frame(&mut self, sample: VideoFrameSample, now: Instant) {
        match self.state {
            SessionState::WaitingForMedia => self.transition(SessionState::Streaming, now),
            SessionState::Streaming => {}
            _ => return,
        }
        if let Some(overlay) = self.sync.present_video_frame(sample) {
            self.sink.overlay(&overlay);
        }
    }

    fn on_vision_metadata(&mut self, sample: VisionMetadataSample) {
        if self.state != SessionState::Streaming {
            return;
        }
        if let SyncOutcome::Matched(pair) = self.sync.add_vision_metadata(sample) {
            self.sink.overlay(&pair.into());
        }
    }

    fn send_offer(&mut self) -> Result<(), SessionError> {
        let sdp = self
            .media
            .create_offer()
            .map_err(|e| SessionError::new(ErrorKind::Sdp, format!("{:#}", e), true))?;
        self.transport
            .send(&ClientMessage::Offer { sdp })
            .map_err(|e| SessionError::new(ErrorKind::Connection, format!("{:#}", e), true))
    }

    fn begin_attempt(&mut self, now: Instant) {
        self.teardown();
        self.connection_id = None;
        self.answer_applied = false;
        self.transition(SessionState::Connecting, now);
        self.timers.arm(Timer::Connect, now + self.config.connect_timeout);
        if let Err(e) = self.transport.open(self.link) {
            self.fail(
                SessionError::new(ErrorKind::Connection, format!("{:#}", e), true),
                now,
            );
        }
    }

    fn fail(&mut self, error: SessionError, now: Instant) {
        if !self.state.is_active() {
            log::debug!("ignoring {} while {}", error, self.state);
            return;
        }
        log::warn!("session failed: {}", error);
        let retryable = error.retryable;
        self.teardown();
        self.transition(SessionState::Error(error), now);

        if !retryable {
            return;
        }
        if self.retry_count < self.config.max_retries {
            self.timers.arm(Timer::Retry, now + self.config.retry_delay);
        } else {
            log::warn!(
                "giving up after {} automatic retries",
                self.config.max_retries
            );
        }
    }

    fn teardown(&mut self) {
        self.transport.close();
        self.link += 1;
        self.media.close();
        self.timers.clear();
        self.sync.flush();
    }

    fn transition(&mut self, to: SessionState, now: Instant) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        self.timers.clear();
        if from == SessionState::Streaming {
            self.sync.flush();
            self.window = StatsWindow::default();
        }
        log::info!("session {} -> {}", from, self.state);

        if self.state == SessionState::Streaming {
            self.retry_count = 0;
            self.window = StatsWindow {
                last_report: Some(now),
                frames_at_last_report: 0,
            };
            self.timers.arm(Timer::Stats, now + self.config.stats_interval);
        }
        self.sink.state_changed(&from, &self.state);
    }

    fn report_stats(&mut self, now: Instant) {
        let sync = self.sync.stats();
        let fps = match self.window.last_report {
            Some(last) if now > last => {
                let frames = sync.video_received - self.window.frames_at_last_report;
                frames as f64 / (now - last).as_secs_f64()
            }
            _ => 0.0,
        };
        self.window = StatsWindow {
            last_report: Some(now),
            frames_at_last_report: sync.video_received,
        };
        let stats = SessionStats {
            frames_received: sync.video_received,
            metadata_received: sync.metadata_received,
            synced_pairs: sync.synced_pairs,
            fallback_overlays: sync.fallback_overlays,
            stale_dropped: sync.stale_dropped,
            fps,
            last_delta_ms: self.sync.last_delta_ms(),
            retry_count: self.retry_count,
        };
        log::debug!("session stats: {:?}", stats);
        self.sink.stats(&stats);
    }
}
