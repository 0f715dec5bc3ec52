//! Signaling between viewers and the stream server.
//!
//! One persistent TCP connection per viewer carries newline-delimited JSON:
//! offer/answer exchange, stream control, keep-alives and, once a combined
//! stream is started, the per-tick `vision_metadata` payload.

mod client;
mod messages;
mod publisher;
mod server;

pub use client::TcpSignalingTransport;
pub use messages::{decode_line, encode_line, ClientMessage, ServerMessage};
pub use publisher::{MetadataPublisher, SharedWriter};
pub use server::{
    SdpAnswerer, SignalingConfig, SignalingHandle, SignalingServer, SyntheticAnswerer,
    DEFAULT_KEEPALIVE, DEFAULT_SIGNALING_ADDR, MAX_LINE_BYTES,
};
