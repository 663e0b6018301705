//! TCP transport: links tunnelled through a [`SignalingServer`].
//!
//! One TCP connection per registration carries every link, multiplexed by
//! link ID. When the connection drops, the registration is lost and every
//! link on it closes.
//!
//! [`SignalingServer`]: crate::transport::SignalingServer

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::transport::link::{Link, LinkId, LinkPeer};
use crate::transport::wire::{self, ClientFrame, ServerFrame};
use crate::transport::{Dialer, Registration, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Client for the TCP signaling relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, local_address: &str, config: &TransportConfig) -> Result<Registration> {
        let mut failures = Vec::new();

        for server in &config.signaling_servers {
            match tokio::time::timeout(
                config.register_timeout(),
                connect_and_register(server, local_address),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    info!("Registered {} with signaling server {}", local_address, server);
                    return Ok(start_connection(stream, server, local_address, config));
                }
                Ok(Err(e)) => {
                    warn!("Signaling server {} rejected registration: {}", server, e);
                    failures.push(format!("{}: {}", server, e));
                }
                Err(_) => {
                    warn!("Signaling server {} timed out", server);
                    failures.push(format!("{}: timed out", server));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no signaling servers configured".to_string());
        }
        Err(Error::SignalingUnavailable(failures.join("; ")))
    }
}

async fn connect_and_register(server: &str, local_address: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(server).await?;
    wire::write_frame(
        &mut stream,
        &ClientFrame::Register {
            address: local_address.to_string(),
        },
    )
    .await?;

    match wire::read_frame::<_, ServerFrame>(&mut stream).await? {
        Some(ServerFrame::Registered { .. }) => Ok(stream),
        Some(ServerFrame::Error { message }) => Err(Error::SignalingUnavailable(message)),
        Some(other) => Err(Error::Protocol(format!("unexpected frame: {:?}", other))),
        None => Err(Error::SignalingUnavailable("connection closed".to_string())),
    }
}

#[derive(Default)]
struct ConnectionState {
    links: HashMap<LinkId, LinkRoute>,
    pending_dials: HashMap<LinkId, PendingDial>,
}

struct LinkRoute {
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
}

struct PendingDial {
    remote_address: String,
    reply: oneshot::Sender<Result<Link>>,
}

#[derive(Clone)]
struct Connection {
    state: Arc<Mutex<ConnectionState>>,
    writer: mpsc::UnboundedSender<ClientFrame>,
    ended: CancellationToken,
}

impl Connection {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build a link, route its inbound frames and start its outbound pump.
    fn adopt_link(&self, link_id: LinkId, remote_address: &str) -> Link {
        let closed = self.ended.child_token();
        let (link, peer) = Link::open(link_id.clone(), remote_address, closed.clone());
        let LinkPeer {
            outbound, inbound, ..
        } = peer;

        self.lock().links.insert(
            link_id.clone(),
            LinkRoute {
                inbound,
                closed: closed.clone(),
            },
        );
        tokio::spawn(pump_outbound(self.clone(), link_id, outbound, closed));
        link
    }

    fn drop_link(&self, link_id: &LinkId) {
        if let Some(route) = self.lock().links.remove(link_id) {
            route.closed.cancel();
        }
    }

    fn handle_frame(&self, frame: ServerFrame, incoming: &mpsc::UnboundedSender<Link>) {
        match frame {
            ServerFrame::Incoming { link_id, from } => {
                debug!("Incoming link {} from {}", link_id, from);
                let link = self.adopt_link(link_id, &from);
                if let Err(mpsc::error::SendError(link)) = incoming.send(link) {
                    link.handle.close();
                }
            }
            ServerFrame::Opened { link_id } => {
                let pending = self.lock().pending_dials.remove(&link_id);
                if let Some(pending) = pending {
                    let link = self.adopt_link(link_id, &pending.remote_address);
                    // Dial timed out meanwhile; nobody wants this link.
                    if let Err(Ok(link)) = pending.reply.send(Ok(link)) {
                        link.handle.close();
                    }
                }
            }
            ServerFrame::DialFailed { link_id, reason } => {
                let pending = self.lock().pending_dials.remove(&link_id);
                if let Some(pending) = pending {
                    let _ = pending.reply.send(Err(Error::Dial(reason)));
                }
            }
            ServerFrame::Data { link_id, payload } => {
                let delivered = self
                    .lock()
                    .links
                    .get(&link_id)
                    .map(|route| route.inbound.send(payload.into_bytes()).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    debug!("Data for unknown link {}", link_id);
                }
            }
            ServerFrame::Closed { link_id } => {
                debug!("Link {} closed by relay", link_id);
                self.drop_link(&link_id);
            }
            ServerFrame::Error { message } => {
                warn!("Signaling server error: {}", message);
            }
            ServerFrame::Registered { .. } => {
                debug!("Ignoring repeated registration ack");
            }
        }
    }

    fn shutdown(&self) {
        self.ended.cancel();
        let mut state = self.lock();
        for (_, route) in state.links.drain() {
            route.closed.cancel();
        }
        // Dropping the reply senders fails the waiting dials.
        state.pending_dials.clear();
    }
}

fn start_connection(
    stream: TcpStream,
    server: &str,
    local_address: &str,
    config: &TransportConfig,
) -> Registration {
    let (reader, writer) = stream.into_split();
    let ended = CancellationToken::new();
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    let connection = Connection {
        state: Arc::new(Mutex::new(ConnectionState::default())),
        writer: writer_tx,
        ended: ended.clone(),
    };

    tokio::spawn(write_loop(writer, writer_rx, ended.clone()));
    tokio::spawn(read_loop(reader, connection.clone(), incoming_tx));

    Registration::new(
        local_address,
        server,
        ended,
        incoming_rx,
        config.dial_timeout(),
        Arc::new(TcpDialer { connection }),
    )
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<ClientFrame>,
    ended: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = ended.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = wire::write_frame(&mut writer, &frame).await {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
        }
    }
    ended.cancel();
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    connection: Connection,
    incoming: mpsc::UnboundedSender<Link>,
) {
    loop {
        let frame = tokio::select! {
            _ = connection.ended.cancelled() => break,
            frame = wire::read_frame::<_, ServerFrame>(&mut reader) => frame,
        };
        match frame {
            Ok(Some(frame)) => connection.handle_frame(frame, &incoming),
            Ok(None) => {
                info!("Signaling connection closed");
                break;
            }
            Err(e) => {
                warn!("Signaling read failed: {}", e);
                break;
            }
        }
    }
    connection.shutdown();
}

async fn pump_outbound(
    connection: Connection,
    link_id: LinkId,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let payload = match String::from_utf8(frame) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping non-UTF-8 frame on link {}: {}", link_id, e);
                        continue;
                    }
                };
                let data = ClientFrame::Data {
                    link_id: link_id.clone(),
                    payload,
                };
                if connection.writer.send(data).is_err() {
                    break;
                }
            }
        }
    }

    let known = connection.lock().links.contains_key(&link_id);
    if known {
        let _ = connection.writer.send(ClientFrame::Close {
            link_id: link_id.clone(),
        });
        connection.drop_link(&link_id);
    }
}

struct TcpDialer {
    connection: Connection,
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, remote_address: &str) -> Result<Link> {
        let link_id = LinkId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.connection.lock().pending_dials.insert(
            link_id.clone(),
            PendingDial {
                remote_address: remote_address.to_string(),
                reply: reply_tx,
            },
        );

        let dial = ClientFrame::Dial {
            link_id: link_id.clone(),
            to: remote_address.to_string(),
        };
        if self.connection.ended.is_cancelled() || self.connection.writer.send(dial).is_err() {
            self.connection.lock().pending_dials.remove(&link_id);
            return Err(Error::Dial("signaling connection closed".to_string()));
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Dial("signaling connection lost".to_string())),
        }
    }
}
