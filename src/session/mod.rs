//! Combined-stream session lifecycle.
//!
//! `disconnected -> connecting -> negotiating -> waiting_for_media ->
//! streaming`, with `error` reachable from any active state, `error ->
//! connecting` on retry and `* -> disconnected` on stop.

mod machine;
mod runtime;
mod state;

pub use machine::{
    CombinedSession, LinkId, MediaEngine, PeerState, PresentationSink, SessionConfig, SessionEvent,
    SessionStats, SignalingTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_MEDIA_TIMEOUT, DEFAULT_MEDIA_WARNING, DEFAULT_NEGOTIATE_TIMEOUT, DEFAULT_RETRY_DELAY,
    DEFAULT_STATS_INTERVAL,
};
pub use runtime::{SessionHandle, SessionInbox, SessionRuntime};
pub use state::{ErrorKind, SessionError, SessionState};
