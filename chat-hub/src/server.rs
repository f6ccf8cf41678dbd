use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::AsyncRead,
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinHandle},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::HubResult,
    hub::Hub,
    line::LineReader,
    router,
    session::{CLOSE_GRACE, Session},
};

/// Upper bound on waiting for a closing session's writer. It covers the
/// writer's own flush and shutdown grace periods.
const WRITER_JOIN_LIMIT: Duration = CLOSE_GRACE.saturating_mul(3);

/// Tunables for the accept loop and per-connection tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    /// Tear a session down after this long without an inbound line.
    pub idle_timeout: Option<Duration>,
}

pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
    config: ServerConfig,
}

impl Server {
    /// Wraps a bound listener. Must be called from within a Tokio runtime,
    /// since the hub's dispatch task starts immediately.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            hub: Hub::spawn(),
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            hub,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&hub).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub, config);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(hub: &Hub) {
    info!("chat hub shutting down");
    for session in hub.registry().snapshot().await {
        session.enqueue("*** server shutting down");
        session.teardown(hub).await;
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &Arc<Hub>,
    config: ServerConfig,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, hub, config),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    hub: &Arc<Hub>,
    config: ServerConfig,
) {
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, hub, config).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

/// Why a connection's reader stopped.
#[derive(Debug)]
enum Disconnect {
    EndOfStream,
    IdleTimeout,
    TornDown,
    WriterGone,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    config: ServerConfig,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = LineReader::new(reader);

    let (session, outbox) = Session::new(peer);
    let mut writer_task = outbox.spawn_writer(writer, peer);

    if let Err(err) = hub
        .registry()
        .register(&session.name(), Arc::clone(&session))
        .await
    {
        warn!(peer = %peer, error = %err, "rejecting connection");
        session.enqueue(format!("error: {err}"));
        session.close();
        join_writer(writer_task, peer).await;
        return Ok(());
    }

    info!(peer = %peer, "session joined");
    hub.broadcast(&session.name(), peer, "joined");

    let mut writer_joined = false;
    let outcome = select! {
        result = read_lines(&hub, &session, &mut reader, config.idle_timeout) => result,
        joined = &mut writer_task => {
            writer_joined = true;
            report_writer_exit(peer, joined);
            Ok(Disconnect::WriterGone)
        }
    };

    session.teardown(&hub).await;
    if !writer_joined {
        join_writer(writer_task, peer).await;
    }

    let reason = outcome.with_context(|| format!("reading from {peer}"))?;
    info!(peer = %peer, name = %session.name(), ?reason, "session closed");
    Ok(())
}

/// Waits for a closing session's writer, aborting it if it overstays.
async fn join_writer(mut writer_task: JoinHandle<()>, peer: SocketAddr) {
    match timeout(WRITER_JOIN_LIMIT, &mut writer_task).await {
        Ok(joined) => report_writer_exit(peer, joined),
        Err(_) => {
            warn!(peer = %peer, "session writer did not stop; aborting it");
            writer_task.abort();
        }
    }
}

fn report_writer_exit(peer: SocketAddr, joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(peer = %peer, error = ?err, "session writer task failed");
    }
}

async fn read_lines<R>(
    hub: &Hub,
    session: &Session,
    reader: &mut LineReader<R>,
    idle_timeout: Option<Duration>,
) -> Result<Disconnect>
where
    R: AsyncRead + Unpin,
{
    loop {
        let line = select! {
            line = next_line(reader, idle_timeout) => line?,
            _ = session.closed() => return Ok(Disconnect::TornDown),
        };

        match line {
            InboundLine::Line(line) => router::route(hub, session, &line).await,
            InboundLine::EndOfStream => return Ok(Disconnect::EndOfStream),
            InboundLine::Idle => {
                debug!(peer = %session.addr(), "idle timeout reached");
                session.enqueue("*** disconnected for inactivity");
                return Ok(Disconnect::IdleTimeout);
            }
        }
    }
}

enum InboundLine {
    Line(String),
    EndOfStream,
    Idle,
}

async fn next_line<R>(
    reader: &mut LineReader<R>,
    idle_timeout: Option<Duration>,
) -> HubResult<InboundLine>
where
    R: AsyncRead + Unpin,
{
    let read = match idle_timeout {
        Some(limit) => match timeout(limit, reader.next_line()).await {
            Ok(read) => read?,
            Err(_) => return Ok(InboundLine::Idle),
        },
        None => reader.next_line().await?,
    };

    Ok(match read {
        Some(line) => InboundLine::Line(line),
        None => InboundLine::EndOfStream,
    })
}
