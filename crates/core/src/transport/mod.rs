//! Transport adapters: how links to the counterpart are made.
//!
//! This module provides:
//! - [`Transport`]: register a local address, dial, listen, send
//! - [`MemoryHub`]: in-process signaling for tests and demos
//! - [`TcpTransport`]: client for the TCP signaling relay
//! - [`SignalingServer`]: the relay itself
//!
//! Links go `connecting → open → closed` and never reopen. Sending on a
//! closed link returns `false` instead of failing.

pub mod link;
pub mod memory;
pub mod relay;
pub mod tcp;
pub mod wire;

pub use link::{Link, LinkHandle, LinkId, LinkPeer, LinkState};
pub use memory::{MemoryHub, MemoryTransport};
pub use relay::SignalingServer;
pub use tcp::TcpTransport;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stream of inbound links for one registration.
pub type Incoming = UnboundedReceiverStream<Link>;

/// Opens links from a live registration.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a link to `remote_address`, without a timeout of its own.
    async fn dial(&self, remote_address: &str) -> Result<Link>;
}

/// A P2P signaling/connection primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register `local_address` so the counterpart can reach it.
    ///
    /// Signaling candidates are tried in priority order, each within the
    /// registration timeout; the first success wins. Fails with
    /// [`Error::SignalingUnavailable`] when none accepts.
    async fn open(&self, local_address: &str, config: &TransportConfig) -> Result<Registration>;

    /// Open a link to `remote_address`.
    ///
    /// Fails with [`Error::DialTimeout`] when the link is not open within the
    /// registration's dial timeout, or [`Error::Dial`] on explicit failure.
    async fn dial(&self, registration: &Registration, remote_address: &str) -> Result<Link> {
        if registration.is_lost() {
            return Err(Error::Dial("registration lost".to_string()));
        }
        debug!("Dialing {} from {}", remote_address, registration.local_address());
        match tokio::time::timeout(
            registration.dial_timeout(),
            registration.dialer().dial(remote_address),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::DialTimeout(remote_address.to_string())),
        }
    }

    /// Best-effort send. `false` if the link is not open.
    fn send(&self, handle: &LinkHandle, frame: &[u8]) -> bool {
        handle.send(frame)
    }
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;

/// A registered local endpoint.
///
/// Clones share state. Loss of the registration (signaling connection
/// dropped, explicit close) is observable through [`Registration::lost`].
#[derive(Clone)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

struct RegistrationInner {
    local_address: String,
    server: String,
    ended: CancellationToken,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Link>>>,
    dial_timeout: Duration,
    dialer: Arc<dyn Dialer>,
}

impl Registration {
    /// Assemble a registration. Called by transport implementations.
    pub fn new(
        local_address: &str,
        server: &str,
        ended: CancellationToken,
        incoming: mpsc::UnboundedReceiver<Link>,
        dial_timeout: Duration,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                local_address: local_address.to_string(),
                server: server.to_string(),
                ended,
                incoming: Mutex::new(Some(incoming)),
                dial_timeout,
                dialer,
            }),
        }
    }

    /// The registered address.
    pub fn local_address(&self) -> &str {
        &self.inner.local_address
    }

    /// The signaling server that accepted us.
    pub fn server(&self) -> &str {
        &self.inner.server
    }

    /// Inbound links. Yields the stream once; later calls return `None`.
    pub fn listen(&self) -> Option<Incoming> {
        self.inner
            .incoming
            .lock()
            .ok()
            .and_then(|mut incoming| incoming.take())
            .map(UnboundedReceiverStream::new)
    }

    /// Whether the registration has ended.
    pub fn is_lost(&self) -> bool {
        self.inner.ended.is_cancelled()
    }

    /// Wait for the registration to end.
    pub async fn lost(&self) {
        self.inner.ended.cancelled().await
    }

    /// Deregister. Existing links are left to their owner.
    pub fn close(&self) {
        self.inner.ended.cancel();
    }

    /// Per-link dial budget.
    pub fn dial_timeout(&self) -> Duration {
        self.inner.dial_timeout
    }

    fn dialer(&self) -> &dyn Dialer {
        self.inner.dialer.as_ref()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("local_address", &self.inner.local_address)
            .field("server", &self.inner.server)
            .field("lost", &self.is_lost())
            .finish()
    }
}

/// Forward frames between two link ends until either closes.
pub(crate) async fn pump_frames(
    mut from: mpsc::UnboundedReceiver<Vec<u8>>,
    to: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = from.recv() => match frame {
                Some(frame) => {
                    if to.send(frame).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    closed.cancel();
}
