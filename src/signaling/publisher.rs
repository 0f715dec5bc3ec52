use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::metadata::{VisionMetadata, VisionStatus};

use super::messages::{encode_line, ServerMessage};

/// Write half of a connection, shared between its handler and the publisher
/// so lines never interleave.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

#[derive(Default)]
struct Subscribers {
    writers: BTreeMap<String, SharedWriter>,
    last_frame_id: Option<u64>,
    published: u64,
}

/// Fans vision metadata out to every connection that started a stream.
#[derive(Clone, Default)]
pub struct MetadataPublisher {
    inner: Arc<Mutex<Subscribers>>,
}

impl MetadataPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, connection_id: &str, writer: SharedWriter) -> Result<()> {
        let mut inner = self.lock()?;
        inner.writers.insert(connection_id.to_string(), writer);
        log::info!(
            "metadata subscriber {} added ({} total)",
            connection_id,
            inner.writers.len()
        );
        Ok(())
    }

    pub fn unsubscribe(&self, connection_id: &str) -> Result<bool> {
        let removed = self.lock()?.writers.remove(connection_id).is_some();
        if removed {
            log::info!("metadata subscriber {} removed", connection_id);
        }
        Ok(removed)
    }

    pub fn subscriber_count(&self) -> Result<usize> {
        Ok(self.lock()?.writers.len())
    }

    /// Total ticks broadcast so far.
    pub fn published(&self) -> Result<u64> {
        Ok(self.lock()?.published)
    }

    /// Broadcast one tick. A tick whose `frame_id` equals the previous one is
    /// skipped. Returns how many subscribers received it.
    pub fn publish(&self, metadata: &VisionMetadata) -> Result<usize> {
        let mut inner = self.lock()?;
        if inner.last_frame_id == Some(metadata.frame_id) {
            return Ok(0);
        }
        inner.last_frame_id = Some(metadata.frame_id);
        inner.published += 1;
        if inner.writers.is_empty() {
            return Ok(0);
        }
        let line = encode_line(&ServerMessage::VisionMetadata(Box::new(metadata.clone())))?;
        Ok(broadcast(&mut inner.writers, &line))
    }

    pub fn publish_status(&self, status: &VisionStatus) -> Result<usize> {
        let mut inner = self.lock()?;
        if inner.writers.is_empty() {
            return Ok(0);
        }
        let line = encode_line(&ServerMessage::VisionStatus(status.clone()))?;
        Ok(broadcast(&mut inner.writers, &line))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Subscribers>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("metadata publisher lock poisoned"))
    }
}

/// Write `line` to every writer, dropping the ones that fail.
fn broadcast(writers: &mut BTreeMap<String, SharedWriter>, line: &str) -> usize {
    let mut failed = Vec::new();
    for (id, writer) in writers.iter() {
        let result = match writer.lock() {
            Ok(mut w) => w.write_all(line.as_bytes()).and_then(|_| w.flush()),
            Err(_) => Err(std::io::Error::other("writer lock poisoned")),
        };
        if let Err(e) = result {
            log::warn!("dropping metadata subscriber {}: {}", id, e);
            failed.push(id.clone());
        }
    }
    for id in &failed {
        writers.remove(id);
    }
    writers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn tick(frame_id: u64) -> VisionMetadata {
        VisionMetadata {
            timestamp: 0.0,
            correlation_timestamp: 0.0,
            frame_id,
            processing_time_ms: 1.0,
            num_streams: 0,
            active_stream_ids: vec![],
            all_streams: Map::new(),
            bev_tracks: vec![],
            uncalibrated: vec![],
        }
    }

    #[test]
    fn publishes_only_on_new_frame_id() {
        let publisher = MetadataPublisher::new();
        let sink: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        publisher.subscribe("a", sink.clone()).unwrap();
        assert_eq!(publisher.publish(&tick(1)).unwrap(), 1);
        assert_eq!(publisher.publish(&tick(1)).unwrap(), 0);
        assert_eq!(publisher.publish(&tick(2)).unwrap(), 1);
        let text = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("{\"type\":\"vision_metadata\""));
    }

    #[test]
    fn failing_subscriber_is_dropped() {
        let publisher = MetadataPublisher::new();
        publisher.subscribe("ok", Arc::new(Mutex::new(Vec::new()))).unwrap();
        publisher.subscribe("broken", Arc::new(Mutex::new(Broken))).unwrap();
        assert_eq!(publisher.publish(&tick(1)).unwrap(), 1);
        assert_eq!(publisher.subscriber_count().unwrap(), 1);
        assert!(publisher.unsubscribe("ok").unwrap());
        assert!(!publisher.unsubscribe("ok").unwrap());
    }
}
