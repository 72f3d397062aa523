use futures::{SinkExt, StreamExt};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ListenerConfig;
use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Direction;
use crate::protocol::pipeline::{ConnectionContext, FrameAction, Pipeline};
use crate::utils::metrics::global_metrics;

/// How long a stopping listener waits for its connections to finish
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream address a listener connects newly accepted clients to.
///
/// Clones share one target; pairings already relaying keep their upstream.
#[derive(Clone)]
pub struct RemoteTarget(Arc<watch::Sender<String>>);

impl RemoteTarget {
    pub fn new(remote: impl Into<String>) -> Self {
        Self(Arc::new(watch::channel(remote.into()).0))
    }

    pub fn get(&self) -> String {
        self.0.borrow().clone()
    }

    /// Point future connections at `remote`, returning the previous address
    pub fn set(&self, remote: impl Into<String>) -> String {
        self.0.send_replace(remote.into())
    }
}

/// A bound listener relaying every accepted client to one remote server
pub struct RelayListener {
    name: String,
    remote: RemoteTarget,
    listener: TcpListener,
    pipeline: Pipeline,
}

impl RelayListener {
    pub async fn bind(config: &ListenerConfig, pipeline: Pipeline) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_address).await?;
        info!(
            listener = %config.name,
            address = %config.listen_address,
            remote = %config.remote_address,
            "Listening"
        );
        Ok(Self {
            name: config.name.clone(),
            remote: RemoteTarget::new(config.remote_address.clone()),
            listener,
            pipeline,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for retargeting this listener while it runs
    pub fn remote(&self) -> RemoteTarget {
        self.remote.clone()
    }

    /// Accept and relay connections until `shutdown_rx` fires or closes
    #[instrument(skip_all, fields(listener = %self.name))]
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let active_connections = Arc::new(Mutex::new(0u32));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down listener. Waiting for connections to close...");

                    let timeout = tokio::time::sleep(SHUTDOWN_TIMEOUT);
                    tokio::pin!(timeout);

                    loop {
                        let connections = *active_connections.lock().await;
                        if connections == 0 {
                            info!("All connections closed, listener stopped");
                            break;
                        }
                        tokio::select! {
                            _ = &mut timeout => {
                                warn!(
                                    connections,
                                    "Shutdown timeout reached, abandoning connections"
                                );
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                                debug!(connections, "Waiting for connections to close");
                            }
                        }
                    }

                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((client, peer)) => {
                            let active_connections = active_connections.clone();
                            *active_connections.lock().await += 1;
                            global_metrics().connection_established();

                            let name = self.name.clone();
                            let remote = self.remote.get();
                            let pipeline = self.pipeline.clone();
                            tokio::spawn(async move {
                                let relayed =
                                    relay_connection(name, client, peer, remote, pipeline).await;
                                match relayed {
                                    Ok(()) => {}
                                    Err(ProtocolError::ConnectionClosed) => {
                                        let reason = constants::ERR_CONNECTION_CLOSED;
                                        debug!(peer = %peer, "{}", reason);
                                    }
                                    Err(e) => {
                                        global_metrics().connection_error();
                                        warn!(peer = %peer, error = %e, "Relay ended with error");
                                    }
                                }

                                global_metrics().connection_closed();
                                *active_connections.lock().await -= 1;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

/// Bind `config.listen_address` and relay until shutdown
pub async fn run_listener(
    config: ListenerConfig,
    pipeline: Pipeline,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    RelayListener::bind(&config, pipeline)
        .await?
        .run(shutdown_rx)
        .await
}

async fn send<W>(sink: &mut FramedWrite<W, FrameCodec>, action: FrameAction) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = match action {
        FrameAction::Forward(bytes) | FrameAction::Rewritten(bytes) => bytes,
        FrameAction::Drop => return Ok(()),
    };
    sink.send(bytes).await.map_err(peer_gone)
}

/// Resets and broken pipes are the peer leaving, not a relay failure
fn peer_gone(e: ProtocolError) -> ProtocolError {
    match e {
        ProtocolError::Io(ref io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) =>
        {
            ProtocolError::ConnectionClosed
        }
        other => other,
    }
}

/// Pair one client with a fresh upstream connection and relay until either
/// side closes. Nothing is read from the client before upstream is connected.
#[instrument(skip_all, fields(listener = %name, peer = %peer, remote = %remote))]
async fn relay_connection(
    name: String,
    client: TcpStream,
    peer: SocketAddr,
    remote: String,
    pipeline: Pipeline,
) -> Result<()> {
    info!("Client connected");
    let server = TcpStream::connect(&remote).await.map_err(|e| {
        error!(remote = %remote, error = %e, "Failed to connect upstream");
        e
    })?;
    info!(remote = %remote, "Server connected");

    client.set_nodelay(true)?;
    server.set_nodelay(true)?;

    let (client_rx, client_tx) = client.into_split();
    let (server_rx, server_tx) = server.into_split();
    let mut from_client = FramedRead::new(client_rx, FrameCodec);
    let mut to_client = FramedWrite::new(client_tx, FrameCodec);
    let mut from_server = FramedRead::new(server_rx, FrameCodec);
    let mut to_server = FramedWrite::new(server_tx, FrameCodec);

    let mut ctx = ConnectionContext::new(name);

    let result = loop {
        tokio::select! {
            frame = from_client.next() => match frame {
                Some(Ok(frame)) => {
                    let action = pipeline.process(Direction::FromClient, frame, &mut ctx);
                    if let Err(e) = send(&mut to_server, action).await {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(peer_gone(e)),
                None => {
                    info!("Client disconnected");
                    break Ok(());
                }
            },
            frame = from_server.next() => match frame {
                Some(Ok(frame)) => {
                    let action = pipeline.process(Direction::FromServer, frame, &mut ctx);
                    if let Err(e) = send(&mut to_client, action).await {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(peer_gone(e)),
                None => {
                    info!("Server disconnected");
                    break Ok(());
                }
            },
        }
    };

    // dropping both halves of both sockets closes the pairing
    ctx.close();
    debug!(state = ?ctx.state(), "Relay finished");
    result
}
