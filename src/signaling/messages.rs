//! Newline-delimited JSON messages exchanged on the signaling connection.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::metadata::{VisionMetadata, VisionStatus};

/// Viewer to server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Offer {
        #[serde(default)]
        sdp: String,
    },
    StartCombinedStream,
    StopCombinedStream,
    Ping,
    Pong,
}

/// Server to viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        connection_id: String,
        #[serde(default)]
        message: String,
    },
    Answer {
        sdp: String,
    },
    Error {
        error_type: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
    #[serde(rename = "stream-started")]
    StreamStarted,
    #[serde(rename = "stream-stopped")]
    StreamStopped,
    Ping,
    Pong,
    VisionMetadata(Box<VisionMetadata>),
    VisionStatus(VisionStatus),
}

impl ServerMessage {
    pub fn error(error_type: &str, message: impl Into<String>, retryable: bool) -> Self {
        ServerMessage::Error {
            error_type: error_type.to_string(),
            message: message.into(),
            retryable,
        }
    }
}

/// Serialize `message` as one line, including the trailing newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim_end()).map_err(|e| anyhow!("invalid signaling message: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_control_uses_kebab_case() {
        let line = encode_line(&ClientMessage::StartCombinedStream).unwrap();
        assert_eq!(line, "{\"type\":\"start-combined-stream\"}\n");
        let started: ServerMessage = decode_line("{\"type\":\"stream-started\"}").unwrap();
        assert_eq!(started, ServerMessage::StreamStarted);
    }

    #[test]
    fn offer_without_sdp_parses_as_empty() {
        let offer: ClientMessage = decode_line("{\"type\":\"offer\"}").unwrap();
        assert_eq!(offer, ClientMessage::Offer { sdp: String::new() });
    }

    #[test]
    fn error_defaults_to_not_retryable() {
        let msg: ServerMessage =
            decode_line("{\"type\":\"error\",\"error_type\":\"sdp\",\"message\":\"bad\"}").unwrap();
        assert_eq!(msg, ServerMessage::error("sdp", "bad", false));
    }

    #[test]
    fn vision_metadata_survives_the_tagged_envelope() {
        use crate::camera::CameraId;
        use crate::metadata::StreamData;
        use std::collections::BTreeMap;

        let mut all_streams = BTreeMap::new();
        all_streams.insert(CameraId(2), StreamData::default());
        let message = ServerMessage::VisionMetadata(Box::new(VisionMetadata {
            timestamp: 1.0,
            correlation_timestamp: 4.0,
            frame_id: 9,
            processing_time_ms: 2.0,
            num_streams: 1,
            active_stream_ids: vec![CameraId(2)],
            all_streams,
            bev_tracks: vec![],
            uncalibrated: vec![],
        }));
        let line = encode_line(&message).unwrap();
        assert!(line.starts_with("{\"type\":\"vision_metadata\""));
        assert_eq!(decode_line::<ServerMessage>(&line).unwrap(), message);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(decode_line::<ClientMessage>("{\"type\":\"teleport\"}").is_err());
        assert!(decode_line::<ClientMessage>("not json").is_err());
    }
}
