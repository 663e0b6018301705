//! TCP signaling relay.
//!
//! Clients register an address, then open links to other registered
//! addresses. The relay forwards link data between the two ends and closes
//! a client's links when its connection drops.

use crate::error::{Error, Result};
use crate::transport::link::LinkId;
use crate::transport::wire::{self, ClientFrame, ServerFrame};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a new connection has to send its registration.
const REGISTER_DEADLINE: Duration = Duration::from_secs(10);

/// The signaling relay server.
pub struct SignalingServer {
    listener: TcpListener,
    state: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    clients: HashMap<String, ClientEntry>,
    links: HashMap<LinkId, RelayLink>,
    next_connection: u64,
}

struct ClientEntry {
    connection: u64,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

struct RelayLink {
    dialer: String,
    acceptor: String,
}

impl RelayLink {
    fn other_end(&self, address: &str) -> Option<&str> {
        if self.dialer == address {
            Some(&self.acceptor)
        } else if self.acceptor == address {
            Some(&self.dialer)
        } else {
            None
        }
    }
}

impl RelayState {
    fn send_to(&self, address: &str, frame: ServerFrame) -> bool {
        self.clients
            .get(address)
            .map(|client| client.tx.send(frame).is_ok())
            .unwrap_or(false)
    }
}

impl SignalingServer {
    /// Bind the relay to `addr` (for example `0.0.0.0:7400`).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(format!("failed to bind {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(RelayState::default())),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process exits.
    pub async fn run(self) -> Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Serve until `shutdown` is cancelled. Open connections are dropped.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        info!("Signaling relay listening on {}", self.local_addr()?);
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted signaling connection from {}", peer);
                    let state = self.state.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = handle_client(stream, state) => {
                                if let Err(e) = result {
                                    debug!("Signaling client {} ended: {}", peer, e);
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                }
            }
        }
        info!("Signaling relay stopped");
        Ok(())
    }
}

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle_client(stream: TcpStream, state: Arc<Mutex<RelayState>>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let first = tokio::time::timeout(
        REGISTER_DEADLINE,
        wire::read_frame::<_, ClientFrame>(&mut reader),
    )
    .await
    .map_err(|_| Error::Protocol("registration timed out".to_string()))??;
    let address = match first {
        Some(ClientFrame::Register { address }) if !address.trim().is_empty() => address,
        Some(_) => {
            let reject = ServerFrame::Error {
                message: "expected register frame".to_string(),
            };
            wire::write_frame(&mut writer, &reject).await?;
            return Err(Error::Protocol("expected register frame".to_string()));
        }
        None => return Ok(()),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = {
        let mut state = lock(&state);
        if state.clients.contains_key(&address) {
            None
        } else {
            state.next_connection += 1;
            let connection = state.next_connection;
            state.clients.insert(
                address.clone(),
                ClientEntry {
                    connection,
                    tx: tx.clone(),
                },
            );
            Some(connection)
        }
    };
    let Some(connection) = connection else {
        let reject = ServerFrame::Error {
            message: format!("address {} is already registered", address),
        };
        wire::write_frame(&mut writer, &reject).await?;
        return Ok(());
    };

    info!("Registered {}", address);
    // Queued before the writer starts so it is always the first frame.
    let _ = tx.send(ServerFrame::Registered {
        address: address.clone(),
    });
    drop(tx);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = wire::write_frame(&mut writer, &frame).await {
                debug!("Relay write failed: {}", e);
                break;
            }
        }
    });

    let result = read_client_frames(&mut reader, &address, &state).await;

    disconnect(&state, &address, connection);
    writer_task.abort();
    info!("Unregistered {}", address);
    result
}

async fn read_client_frames(
    reader: &mut tokio::net::tcp::OwnedReadHalf,
    address: &str,
    state: &Mutex<RelayState>,
) -> Result<()> {
    while let Some(frame) = wire::read_frame::<_, ClientFrame>(reader).await? {
        route_frame(&mut lock(state), address, frame);
    }
    Ok(())
}

fn route_frame(state: &mut RelayState, address: &str, frame: ClientFrame) {
    match frame {
        ClientFrame::Register { .. } => {
            state.send_to(
                address,
                ServerFrame::Error {
                    message: "already registered".to_string(),
                },
            );
        }
        ClientFrame::Dial { link_id, to } => {
            let reachable = to != address
                && !state.links.contains_key(&link_id)
                && state.send_to(
                    &to,
                    ServerFrame::Incoming {
                        link_id: link_id.clone(),
                        from: address.to_string(),
                    },
                );
            if reachable {
                debug!("Link {} open: {} -> {}", link_id, address, to);
                state.links.insert(
                    link_id.clone(),
                    RelayLink {
                        dialer: address.to_string(),
                        acceptor: to,
                    },
                );
                state.send_to(address, ServerFrame::Opened { link_id });
            } else {
                state.send_to(
                    address,
                    ServerFrame::DialFailed {
                        link_id,
                        reason: format!("peer {} is unavailable", to),
                    },
                );
            }
        }
        ClientFrame::Data { link_id, payload } => {
            let target = state
                .links
                .get(&link_id)
                .and_then(|link| link.other_end(address))
                .map(str::to_string);
            match target {
                Some(target) => {
                    state.send_to(&target, ServerFrame::Data { link_id, payload });
                }
                None => debug!("Data from {} for unknown link {}", address, link_id),
            }
        }
        ClientFrame::Close { link_id } => {
            let target = state
                .links
                .get(&link_id)
                .and_then(|link| link.other_end(address))
                .map(str::to_string);
            if let Some(target) = target {
                state.links.remove(&link_id);
                state.send_to(&target, ServerFrame::Closed { link_id });
            }
        }
    }
}

fn disconnect(state: &Mutex<RelayState>, address: &str, connection: u64) {
    let mut state = lock(state);
    if state
        .clients
        .get(address)
        .map(|client| client.connection == connection)
        .unwrap_or(false)
    {
        state.clients.remove(address);
    }

    let orphaned: Vec<(LinkId, String)> = state
        .links
        .iter()
        .filter_map(|(id, link)| {
            link.other_end(address)
                .map(|other| (id.clone(), other.to_string()))
        })
        .collect();
    for (link_id, other) in orphaned {
        state.links.remove(&link_id);
        state.send_to(&other, ServerFrame::Closed { link_id });
    }
}
