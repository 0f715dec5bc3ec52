use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::session::{LinkId, SessionEvent, SessionHandle, SignalingTransport};

use super::messages::{decode_line, encode_line, ClientMessage, ServerMessage};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type SharedStream = Arc<Mutex<Option<TcpStream>>>;

struct Link {
    stream: SharedStream,
    closed: Arc<AtomicBool>,
}

/// Viewer side of the signaling connection.
///
/// `open` only spawns the link thread: it resolves and connects, then posts
/// every server message to the session tagged with its link id. A failed
/// connect arrives as `SignalingClosed`, so the session thread never waits
/// on the network. A link that was closed locally reports nothing more.
pub struct TcpSignalingTransport {
    addr: String,
    events: SessionHandle,
    link: Option<Link>,
}

impl TcpSignalingTransport {
    pub fn new(addr: impl Into<String>, events: SessionHandle) -> Self {
        Self {
            addr: addr.into(),
            events,
            link: None,
        }
    }
}

impl SignalingTransport for TcpSignalingTransport {
    fn open(&mut self, link: LinkId) -> Result<()> {
        self.close();
        let stream: SharedStream = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let worker = LinkWorker {
            link,
            addr: self.addr.clone(),
            stream: stream.clone(),
            closed: closed.clone(),
            events: self.events.clone(),
        };
        std::thread::Builder::new()
            .name(format!("trackstudio-signaling-{}", link))
            .spawn(move || worker.run())?;

        self.link = Some(Link { stream, closed });
        Ok(())
    }

    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| anyhow!("signaling link is not open"))?;
        let line = encode_line(message)?;
        let mut guard = link
            .stream
            .lock()
            .map_err(|_| anyhow!("signaling stream lock poisoned"))?;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("signaling link is still connecting"))?;
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        // Holding the lock orders this against the worker installing its stream.
        let mut guard = match link.stream.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        link.closed.store(true, Ordering::SeqCst);
        if let Some(stream) = guard.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        log::debug!("signaling link closed");
    }
}

impl Drop for TcpSignalingTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct LinkWorker {
    link: LinkId,
    addr: String,
    stream: SharedStream,
    closed: Arc<AtomicBool>,
    events: SessionHandle,
}

impl LinkWorker {
    fn run(self) {
        let reason = match self.connect() {
            Ok(Some(reader)) => self.read_messages(reader),
            Ok(None) => return,
            Err(e) => format!("{:#}", e),
        };
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.events.post(SessionEvent::SignalingClosed {
            link: self.link,
            reason,
        });
    }

    /// Connect and publish the write half. `None` if closed meanwhile.
    fn connect(&self) -> Result<Option<TcpStream>> {
        let target = self
            .addr
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}", self.addr))?
            .next()
            .ok_or_else(|| anyhow!("{} resolved to no addresses", self.addr))?;
        let stream = TcpStream::connect_timeout(&target, CONNECT_TIMEOUT)
            .with_context(|| format!("cannot reach signaling server {}", target))?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;

        let mut slot = self
            .stream
            .lock()
            .map_err(|_| anyhow!("signaling stream lock poisoned"))?;
        if self.closed.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(None);
        }
        *slot = Some(stream);
        log::debug!("signaling link {} to {} opened", self.link, target);
        Ok(Some(reader))
    }

    fn read_messages(&self, stream: TcpStream) -> String {
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => return e.to_string(),
            };
            if self.closed.load(Ordering::SeqCst) {
                return "closed locally".to_string();
            }
            if line.trim().is_empty() {
                continue;
            }
            match decode_line::<ServerMessage>(&line) {
                Ok(message) => {
                    let event = SessionEvent::Server {
                        link: self.link,
                        message,
                    };
                    if self.events.post(event).is_err() {
                        return "session runtime gone".to_string();
                    }
                }
                Err(e) => log::warn!("ignoring signaling line: {:#}", e),
            }
        }
        "server closed the connection".to_string()
    }
}
