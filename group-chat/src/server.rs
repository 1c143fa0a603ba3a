use std::{future::Future, io, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs, tcp::OwnedWriteHalf},
    select,
    sync::mpsc,
    task::JoinSet,
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::{
    codec::LineCodec,
    connections::ConnectionId,
    protocol::SHUTDOWN_TOKEN,
    router::{self, Event, Outbound, Router},
};

/// How long connection tasks get to flush the shutdown notice.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Server {
    listener: TcpListener,
    router: Router,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            router: Router::new(),
        }
    }

    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind server socket")?;
        Ok(Self::new(listener))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` resolves, then pushes the shutdown
    /// notice to every client and waits briefly for it to be written.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, router } = self;
        let (events, inbox) = mpsc::unbounded_channel();
        let mut router_task = tokio::spawn(router::run(router, inbox));
        let mut connections = JoinSet::new();
        let mut next_id = 0u64;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    let _ = events.send(Event::Shutdown);
                    break;
                }
                accept_result = listener.accept() => {
                    next_id += 1;
                    handle_accept_result(
                        accept_result,
                        ConnectionId::new(next_id),
                        &events,
                        &mut connections,
                    );
                }
                Some(joined) = connections.join_next() => {
                    if let Err(err) = joined {
                        error!(error = ?err, "connection task failed");
                    }
                }
                router_result = &mut router_task => {
                    router_result.context("router task failed")?;
                    anyhow::bail!("router stopped unexpectedly");
                }
            }
        }

        router_task.await.context("router task failed")?;
        drop(events);
        drain_connections(connections).await;
        Ok(())
    }

    /// Runs until the operator types `EXIT` on stdin or presses ctrl-c.
    pub async fn run_until_operator_exit(self) -> Result<()> {
        self.run_until(async {
            select! {
                _ = wait_for_shutdown_token(BufReader::new(tokio::io::stdin())) => {
                    info!("EXIT command is typed: server is shutting down");
                }
                _ = ctrl_c() => {
                    info!("ctrl-c received: server is shutting down");
                }
            }
        })
        .await
    }
}

/// Resolves once a line equal to [`SHUTDOWN_TOKEN`] is read.
///
/// If the console closes or fails the future never resolves, so a server
/// started without a terminal keeps running.
pub async fn wait_for_shutdown_token<R>(reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim_end() == SHUTDOWN_TOKEN => return,
            Ok(Some(line)) => debug!(%line, "ignoring console input"),
            Ok(None) => break,
            Err(err) => {
                warn!(error = ?err, "failed to read operator console");
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    id: ConnectionId,
    events: &mpsc::UnboundedSender<Event>,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => {
            let (outbox, outbox_rx) = mpsc::unbounded_channel();
            let registered = events.send(Event::Connected {
                id,
                peer: Some(peer),
                outbox,
            });
            if registered.is_err() {
                warn!(%peer, "router is gone; refusing connection");
                return;
            }
            connections.spawn(serve_connection(stream, id, outbox_rx, events.clone()));
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

type ConnectionWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

/// Pumps one connection: framed lines go to the router, queued outbound
/// lines go to the socket.
async fn serve_connection(
    stream: TcpStream,
    id: ConnectionId,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<Event>,
) {
    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LineCodec::new());
    let mut writer = FramedWrite::new(writer, LineCodec::new());

    loop {
        select! {
            frame = lines.next() => {
                let error = match frame {
                    Some(Ok(line)) => {
                        if events.send(Event::Line { id, line }).is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Err(error)) => Some(error),
                    None => None,
                };
                if events.send(Event::Disconnected { id, error }).is_err() {
                    break;
                }
                // Replies to lines read before the end of input are still owed.
                flush_outbox(id, &mut outbox, &mut writer).await;
                break;
            }
            outbound = outbox.recv() => match outbound {
                Some(Outbound::Line(line)) => {
                    if let Err(error) = writer.send(line).await {
                        if events.send(Event::Disconnected { id, error: Some(error) }).is_err() {
                            debug!(%id, "router is gone; dropping write failure");
                        }
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    close_writer(id, &mut writer).await;
                    break;
                }
            },
        }
    }
}

/// Writes whatever the router still queues for `id` until it closes the
/// outbox or drops it.
async fn flush_outbox(
    id: ConnectionId,
    outbox: &mut mpsc::UnboundedReceiver<Outbound>,
    writer: &mut ConnectionWriter,
) {
    while let Some(Outbound::Line(line)) = outbox.recv().await {
        if let Err(error) = writer.send(line).await {
            debug!(%id, %error, "peer stopped reading before replies were flushed");
            return;
        }
    }
    close_writer(id, writer).await;
}

async fn close_writer(id: ConnectionId, writer: &mut ConnectionWriter) {
    if let Err(error) = writer.close().await {
        debug!(%id, %error, "failed to close connection cleanly");
    }
}

async fn drain_connections(mut connections: JoinSet<()>) {
    let drained = timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "connections did not close in time; aborting"
        );
        connections.shutdown().await;
    }
}
