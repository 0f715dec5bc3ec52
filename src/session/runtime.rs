use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use super::machine::{CombinedSession, SessionEvent};
use super::state::SessionState;

enum Command {
    Event(SessionEvent),
    Start,
    Retry,
    Stop(Sender<()>),
    Shutdown,
}

/// Cloneable entry point for feeding a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Sender<Command>,
}

impl SessionHandle {
    pub fn post(&self, event: SessionEvent) -> Result<()> {
        self.send(Command::Event(event))
    }

    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn retry(&self) -> Result<()> {
        self.send(Command::Retry)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("session runtime has stopped"))
    }
}

/// Receiving side created by [`SessionRuntime::channel`].
pub struct SessionInbox {
    rx: Receiver<Command>,
}

/// Runs a [`CombinedSession`] on its own thread.
///
/// Events are applied in arrival order, one at a time, so the session and
/// its synchronizer buffers have a single writer. Between events the thread
/// sleeps until the session's next deadline.
pub struct SessionRuntime {
    handle: SessionHandle,
    state: Arc<Mutex<SessionState>>,
    join: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    /// Create the event channel first, so collaborators such as the signaling
    /// transport can hold a handle before the session exists.
    pub fn channel() -> (SessionHandle, SessionInbox) {
        let (tx, rx) = mpsc::channel();
        (SessionHandle { tx }, SessionInbox { rx })
    }

    pub fn spawn(session: CombinedSession, handle: SessionHandle, inbox: SessionInbox) -> Result<Self> {
        let state = Arc::new(Mutex::new(session.state().clone()));
        let shared = Arc::clone(&state);
        let join = std::thread::Builder::new()
            .name("trackstudio-session".to_string())
            .spawn(move || run(session, inbox.rx, shared))?;
        Ok(Self {
            handle,
            state,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Last state published by the session thread.
    pub fn state(&self) -> Result<SessionState> {
        self.state
            .lock()
            .map(|state| state.clone())
            .map_err(|_| anyhow!("session state lock poisoned"))
    }

    pub fn start(&self) -> Result<()> {
        self.handle.start()
    }

    pub fn retry(&self) -> Result<()> {
        self.handle.retry()
    }

    /// Stop the session and wait until it has torn down. Idempotent.
    pub fn stop(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.handle.send(Command::Stop(ack_tx)).is_err() {
            return Ok(());
        }
        // A closed channel means the thread is already gone.
        let _ = ack_rx.recv();
        Ok(())
    }

    /// Stop the session and join its thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<()> {
        let _ = self.handle.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("session thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.join_thread() {
            log::error!("session runtime shutdown: {:#}", e);
        }
    }
}

fn run(mut session: CombinedSession, rx: Receiver<Command>, shared: Arc<Mutex<SessionState>>) {
    log::debug!("session thread started");
    loop {
        let received = match session.next_deadline() {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let now = Instant::now();
        match received {
            Ok(Command::Event(event)) => session.dispatch(event, now),
            Ok(Command::Start) => {
                session.start(now);
            }
            Ok(Command::Retry) => {
                session.retry(now);
            }
            Ok(Command::Stop(ack)) => {
                session.stop(now);
                publish(&shared, session.state());
                let _ = ack.send(());
                continue;
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                session.stop(now);
                publish(&shared, session.state());
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        session.poll(Instant::now());
        publish(&shared, session.state());
    }
    log::debug!("session thread exited");
}

fn publish(shared: &Mutex<SessionState>, state: &SessionState) {
    match shared.lock() {
        Ok(mut guard) => {
            if *guard != *state {
                *guard = state.clone();
            }
        }
        Err(_) => log::error!("session state lock poisoned"),
    }
}
