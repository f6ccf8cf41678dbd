//! Per-connection state and the writer task that owns the outbound half of
//! the transport.
//!
//! A [`Session`] is shared (`Arc`) between the registry, the dispatch loop and
//! the connection's reader task. The outbound queue is multi-producer: anyone
//! holding the session may [`Session::enqueue`] a line. Only the [`Outbox`]
//! consumes it, and the outbox is moved into the writer task.
//!
//! Shutdown is an explicit state machine (`Active -> Closing -> Closed`) kept
//! in a `watch` channel. The first caller to leave `Active` wins and performs
//! the teardown; everyone else sees `false` and returns.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, trace};

use crate::{hub::Hub, line::write_line};

pub type SessionId = u64;

/// How long a closing session's writer keeps trying to flush its backlog and
/// shut the transport down.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

pub struct Session {
    id: SessionId,
    addr: SocketAddr,
    name: RwLock<String>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state: watch::Sender<SessionState>,
}

/// Receiving side of a session's outbound queue.
pub struct Outbox {
    inbox: mpsc::UnboundedReceiver<String>,
    state: watch::Receiver<SessionState>,
}

impl Session {
    /// Creates a session whose display name starts out as the peer address.
    pub fn new(addr: SocketAddr) -> (Arc<Self>, Outbox) {
        Self::with_name(addr.to_string(), addr)
    }

    pub fn with_name(name: impl Into<String>, addr: SocketAddr) -> (Arc<Self>, Outbox) {
        let (outbound, inbox) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(SessionState::Active);
        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            name: RwLock::new(name.into()),
            outbound: Mutex::new(Some(outbound)),
            state,
        });
        let outbox = Outbox {
            inbox,
            state: state_rx,
        };
        (session, outbox)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the registry renames sessions, inside its write lock.
    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Queues a line for the writer task.
    ///
    /// Returns `false` without side effects once teardown has begun or the
    /// writer has gone away.
    pub fn enqueue(&self, line: impl Into<String>) -> bool {
        if !self.is_active() {
            return false;
        }
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(sender) => sender.send(line.into()).is_ok(),
            None => false,
        }
    }

    /// Resolves once the session has left the `Active` state.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        // An error means the sender is gone, which only happens once the
        // session itself is dropped.
        let _ = state.wait_for(|state| *state != SessionState::Active).await;
    }

    /// Removes the session from the hub, announces the departure and closes
    /// the transport and outbound queue.
    ///
    /// Safe to call any number of times from any task. Returns `true` only
    /// for the call that actually performed the teardown.
    pub async fn teardown(&self, hub: &Hub) -> bool {
        if !self.begin_closing() {
            return false;
        }

        let name = self.name();
        if hub.registry().remove_session(self).await {
            hub.broadcast(&name, self.addr, "left");
        }
        self.finish_closing();
        debug!(peer = %self.addr, %name, "session torn down");
        true
    }

    /// Closes the transport and outbound queue without touching the registry.
    ///
    /// Used for sessions that never made it into the registry.
    pub fn close(&self) -> bool {
        if !self.begin_closing() {
            return false;
        }
        self.finish_closing();
        true
    }

    fn begin_closing(&self) -> bool {
        // Leaving `Active` is also the signal the reader and writer tasks
        // watch for to stop touching the transport.
        self.state.send_if_modified(|state| {
            if *state == SessionState::Active {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        })
    }

    fn finish_closing(&self) {
        // Dropping the last sender lets the writer drain and exit.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.send_replace(SessionState::Closed);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Outbox {
    pub async fn recv(&mut self) -> Option<String> {
        self.inbox.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<String> {
        self.inbox.try_recv().ok()
    }

    /// Starts the single writer for this session's transport.
    pub fn spawn_writer<W>(self, writer: W, peer: SocketAddr) -> JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(run_writer(self, writer, peer))
    }
}

async fn run_writer<W>(outbox: Outbox, mut writer: W, peer: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    let Outbox {
        mut inbox,
        mut state,
    } = outbox;

    {
        let delivery = deliver(&mut inbox, &mut writer, peer);
        tokio::pin!(delivery);

        select! {
            _ = &mut delivery => {}
            _ = wait_for_closing(&mut state) => {
                // Teardown drops the queue's sender, so delivery ends once the
                // backlog is written. A peer that stopped reading gets no more
                // than the grace period.
                if timeout(CLOSE_GRACE, &mut delivery).await.is_err() {
                    debug!(peer = %peer, "peer stopped reading; dropping undelivered lines");
                }
            }
        }
    }

    shutdown_transport(&mut writer, peer).await;
}

/// Writes queued lines in order until the queue closes or a write fails.
async fn deliver<W>(
    inbox: &mut mpsc::UnboundedReceiver<String>,
    writer: &mut W,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = inbox.recv().await {
        if let Err(error) = write_line(writer, &line).await {
            debug!(peer = %peer, ?error, "failed to deliver line");
            return;
        }
    }
}

async fn wait_for_closing(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(|state| *state != SessionState::Active).await;
}

async fn shutdown_transport<W>(writer: &mut W, peer: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    match timeout(CLOSE_GRACE, writer.shutdown()).await {
        Ok(Ok(())) => trace!(peer = %peer, "transport closed"),
        Ok(Err(error)) if error.kind() == io::ErrorKind::NotConnected => {}
        Ok(Err(error)) => debug!(peer = %peer, ?error, "failed to close transport cleanly"),
        Err(_) => debug!(peer = %peer, "transport shutdown timed out"),
    }
}
