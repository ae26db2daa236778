//! V2 tunnel session registry
//!
//! A V2 tunnel is two independent HTTP requests sharing one outbound TCP
//! connection, paired by an opaque session id. The registry is the only
//! cross-request state in the process: a concurrent map of sessions, each
//! owning its socket halves behind claim locks, with an async once-cell
//! as the readiness latch so concurrent first callers rendezvous on a
//! single connect attempt.

use crate::common::net;
use crate::transport::{StreamChunkReader, StreamChunkWriter};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::OnceCell;
use tracing::debug;

pub type SessionReader = StreamChunkReader<OwnedReadHalf>;
pub type SessionWriter = StreamChunkWriter<OwnedWriteHalf>;

/// Observable session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Connecting,
    Ready,
    Draining,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Fresh => "fresh",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// One paired upload/download tunnel.
pub struct Session {
    id: String,
    /// Readiness latch: holds the connect outcome once the first caller
    /// finishes; later callers await it instead of dialing again.
    ready: OnceCell<std::result::Result<(), String>>,
    connecting: AtomicBool,
    draining: AtomicBool,
    closed: AtomicBool,
    reader: Mutex<Option<SessionReader>>,
    writer: Mutex<Option<SessionWriter>>,
    /// Writer handed back after a completed upload. Parked rather than
    /// dropped so the socket stays open (no FIN) while the download half
    /// drains, and never reclaimable by a second POST.
    parked_writer: Mutex<Option<SessionWriter>>,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(id: String) -> Self {
        Session {
            id,
            ready: OnceCell::new(),
            connecting: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            parked_writer: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the outbound socket, once. Concurrent callers wait on the
    /// same attempt; whoever arrives first dials.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.touch();
        let outcome = self
            .ready
            .get_or_init(|| async {
                self.connecting.store(true, Ordering::SeqCst);
                match net::connect_tcp(host, port).await {
                    Ok(stream) => {
                        let (read, write) = stream.into_split();
                        *self.reader.lock() = Some(StreamChunkReader::new(read));
                        *self.writer.lock() = Some(StreamChunkWriter::new(write));
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                }
            })
            .await;

        outcome.clone().map_err(Error::connect)
    }

    /// Claim the upload half. `None` means a POST already owns it.
    pub fn claim_writer(&self) -> Option<SessionWriter> {
        self.touch();
        self.writer.lock().take()
    }

    /// Claim the download half. `None` means a GET already owns it.
    pub fn claim_reader(&self) -> Option<SessionReader> {
        self.touch();
        let reader = self.reader.lock().take();
        if reader.is_some() {
            self.draining.store(true, Ordering::SeqCst);
        }
        reader
    }

    /// Hand the upload half back after the POST body ends. The socket
    /// must not see a FIN while the download half is still draining.
    pub fn park_writer(&self, writer: SessionWriter) {
        *self.parked_writer.lock() = Some(writer);
    }

    /// Reset the idle clock. Every request touching the session and every
    /// download chunk calls this.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            return SessionState::Closed;
        }
        if self.draining.load(Ordering::SeqCst) {
            return SessionState::Draining;
        }
        match self.ready.get() {
            Some(Ok(())) => SessionState::Ready,
            Some(Err(_)) => SessionState::Closed,
            None if self.connecting.load(Ordering::SeqCst) => SessionState::Connecting,
            None => SessionState::Fresh,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Unclaimed halves drop here, closing the socket
        self.reader.lock().take();
        self.writer.lock().take();
        self.parked_writer.lock().take();
    }
}

/// Removes its session from the registry when dropped. Held by the V2
/// download stream so every exit path (EOF, error, client abandon) tears
/// the session down.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, id: String) -> Self {
        SessionGuard { registry, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Process-wide map of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Return the session for `id`, installing a fresh one atomically if
    /// none exists.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id.to_string())))
            .clone();
        session.touch();
        session
    }

    /// Remove a session and close whatever it still owns.
    pub fn remove(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.close();
            debug!("session {} removed ({})", id, session.state());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session idle past the TTL. Returns how many were
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            debug!("session {} expired", id);
            self.remove(id);
        }
        expired.len()
    }

    /// Start the idle watchdog.
    pub fn start_sweeper(self: &Arc<Self>) {
        let registry = self.clone();
        let period = (registry.ttl / 3).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                registry.sweep_expired();
            }
        });
    }
}
