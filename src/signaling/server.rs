use anyhow::{anyhow, bail, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::messages::{decode_line, encode_line, ClientMessage, ServerMessage};
use super::publisher::{MetadataPublisher, SharedWriter};

pub const DEFAULT_SIGNALING_ADDR: &str = "127.0.0.1:8765";
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Session descriptions can be large; anything past this is not signaling.
pub const MAX_LINE_BYTES: usize = 256 * 1024;
const READ_POLL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub struct SignalingConfig {
    pub addr: String,
    /// Idle time after which the server sends a keep-alive ping.
    pub keepalive: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_SIGNALING_ADDR.to_string(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Produces the server's answer to a viewer's offer.
pub trait SdpAnswerer: Send + Sync {
    fn answer(&self, connection_id: &str, offer_sdp: &str) -> Result<String>;
}

/// Answers every well-formed offer with a fixed send-only description.
/// Used with stub:// cameras where no real media leaves the process.
pub struct SyntheticAnswerer;

impl SdpAnswerer for SyntheticAnswerer {
    fn answer(&self, connection_id: &str, offer_sdp: &str) -> Result<String> {
        if !offer_sdp.trim_start().starts_with("v=0") {
            bail!("offer is not a session description");
        }
        Ok(format!(
            "v=0\r\no=trackstudio {} 0 IN IP4 127.0.0.1\r\ns=combined\r\nt=0 0\r\na=sendonly\r\n",
            connection_id
        ))
    }
}

#[derive(Debug)]
pub struct SignalingHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SignalingHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("signaling server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct SignalingServer {
    cfg: SignalingConfig,
    answerer: Arc<dyn SdpAnswerer>,
    publisher: MetadataPublisher,
}

impl SignalingServer {
    pub fn new(
        cfg: SignalingConfig,
        answerer: Arc<dyn SdpAnswerer>,
        publisher: MetadataPublisher,
    ) -> Self {
        Self {
            cfg,
            answerer,
            publisher,
        }
    }

    pub fn spawn(self) -> Result<SignalingHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid signaling address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("signaling server listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, self, shutdown_thread) {
                log::error!("signaling server stopped: {}", err);
            }
        });

        Ok(SignalingHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, server: SignalingServer, shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let connection_id = format!("{:016x}", rand::random::<u64>());
                log::info!("signaling connection {} from {}", connection_id, peer);
                let answerer = server.answerer.clone();
                let publisher = server.publisher.clone();
                let keepalive = server.cfg.keepalive;
                let shutdown = shutdown.clone();
                connections.push(std::thread::spawn(move || {
                    let ctx = Connection {
                        id: connection_id,
                        answerer,
                        publisher,
                        keepalive,
                    };
                    if let Err(err) = ctx.serve(stream, &shutdown) {
                        log::warn!("signaling connection {} ended: {}", ctx.id, err);
                    }
                    if let Err(err) = ctx.publisher.unsubscribe(&ctx.id) {
                        log::warn!("signaling connection {} cleanup: {}", ctx.id, err);
                    }
                    log::info!("signaling connection {} closed", ctx.id);
                }));
                connections.retain(|handle| !handle.is_finished());
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };
    for handle in connections {
        if handle.join().is_err() {
            log::error!("signaling connection thread panicked");
        }
    }
    result
}

struct Connection {
    id: String,
    answerer: Arc<dyn SdpAnswerer>,
    publisher: MetadataPublisher,
    keepalive: Duration,
}

impl Connection {
    fn serve(&self, stream: TcpStream, shutdown: &AtomicBool) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_POLL))?;
        let writer: SharedWriter = Arc::new(Mutex::new(stream.try_clone()?));
        send(
            &writer,
            &ServerMessage::ConnectionEstablished {
                connection_id: self.id.clone(),
                message: "Signaling connection ready".to_string(),
            },
        )?;

        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut last_activity = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let budget = (MAX_LINE_BYTES + 1).saturating_sub(buf.len()) as u64;
            match (&mut reader).take(budget).read_until(b'\n', &mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    if buf.last() != Some(&b'\n') {
                        if buf.len() > MAX_LINE_BYTES {
                            let reply = ServerMessage::error("protocol", "Message too large", false);
                            send(&writer, &reply)?;
                            bail!("message exceeds {} bytes", MAX_LINE_BYTES);
                        }
                        // Peer closed mid-line; the next read reports EOF.
                        continue;
                    }
                    last_activity = Instant::now();
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    self.handle_line(line.trim(), &writer)?;
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if last_activity.elapsed() >= self.keepalive {
                        send(&writer, &ServerMessage::Ping)?;
                        last_activity = Instant::now();
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn handle_line(&self, line: &str, writer: &SharedWriter) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        let message: ClientMessage = match decode_line(line) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("connection {}: {}", self.id, err);
                return send(
                    writer,
                    &ServerMessage::error("protocol", format!("{:#}", err), false),
                );
            }
        };

        match message {
            ClientMessage::Offer { sdp } => {
                if sdp.trim().is_empty() {
                    return send(
                        writer,
                        &ServerMessage::error("sdp", "Missing SDP in offer", false),
                    );
                }
                match self.answerer.answer(&self.id, &sdp) {
                    Ok(answer) => send(writer, &ServerMessage::Answer { sdp: answer }),
                    Err(err) => {
                        log::warn!("connection {}: offer rejected: {:#}", self.id, err);
                        send(
                            writer,
                            &ServerMessage::error("unknown", format!("{:#}", err), true),
                        )
                    }
                }
            }
            ClientMessage::StartCombinedStream => {
                send(writer, &ServerMessage::StreamStarted)?;
                self.publisher.subscribe(&self.id, writer.clone())
            }
            ClientMessage::StopCombinedStream => {
                self.publisher.unsubscribe(&self.id)?;
                send(writer, &ServerMessage::StreamStopped)
            }
            ClientMessage::Ping => send(writer, &ServerMessage::Pong),
            ClientMessage::Pong => Ok(()),
        }
    }
}

fn send(writer: &SharedWriter, message: &ServerMessage) -> Result<()> {
    let line = encode_line(message)?;
    let mut guard = writer
        .lock()
        .map_err(|_| anyhow!("connection writer lock poisoned"))?;
    guard.write_all(line.as_bytes())?;
    guard.flush()?;
    Ok(())
}
