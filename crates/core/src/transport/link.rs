//! Link handles: one open data channel to the remote peer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub String);

impl LinkId {
    /// Generate a new random link ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a link. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Dial in flight. Handles are only handed out once open.
    Connecting,
    /// Frames flow both ways.
    Open,
    /// Gone for good; a new dial or inbound link is needed.
    Closed,
}

/// Cheap, cloneable handle used to send on and close a link.
#[derive(Clone)]
pub struct LinkHandle {
    id: LinkId,
    remote_address: String,
    created_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
}

impl LinkHandle {
    /// Link ID.
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// Address of the other end.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// When the link opened.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        if self.is_open() {
            LinkState::Open
        } else {
            LinkState::Closed
        }
    }

    /// Whether frames can still be sent.
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.outbound.is_closed()
    }

    /// Queue one frame. Returns `false` if the link is not open.
    pub fn send(&self, frame: &[u8]) -> bool {
        self.is_open() && self.outbound.send(frame.to_vec()).is_ok()
    }

    /// Close the link. Both ends observe the closure.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Wait until the link is closed from either side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .finish()
    }
}

/// An open link as handed to the session: the handle plus inbound frames.
///
/// The inbound stream ends when the link closes.
pub struct Link {
    /// Send/close handle.
    pub handle: LinkHandle,
    /// Frames from the remote peer, in order.
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// The transport's side of a link.
pub struct LinkPeer {
    /// Frames the session queued for sending.
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Where frames from the remote peer go.
    pub inbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Cancelled when either side closes.
    pub closed: CancellationToken,
}

impl Link {
    /// Create an open link to `remote_address` and the transport-side ends.
    pub fn open(id: LinkId, remote_address: &str, closed: CancellationToken) -> (Link, LinkPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let link = Link {
            handle: LinkHandle {
                id,
                remote_address: remote_address.to_string(),
                created_at: Utc::now(),
                outbound: outbound_tx,
                closed: closed.clone(),
            },
            inbound: inbound_rx,
        };
        let peer = LinkPeer {
            outbound: outbound_rx,
            inbound: inbound_tx,
            closed,
        };
        (link, peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_close() {
        let (link, mut peer) = Link::open(LinkId::new(), "abhi", CancellationToken::new());
        assert_eq!(link.handle.state(), LinkState::Open);

        assert!(link.handle.send(b"one"));
        assert_eq!(peer.outbound.recv().await.unwrap(), b"one".to_vec());

        link.handle.close();
        assert_eq!(link.handle.state(), LinkState::Closed);
        assert!(!link.handle.send(b"two"));
        assert!(peer.closed.is_cancelled());
    }

    #[tokio::test]
    async fn test_transport_drop_closes_handle() {
        let (link, peer) = Link::open(LinkId::new(), "abhi", CancellationToken::new());
        drop(peer);
        assert!(!link.handle.is_open());
        assert!(!link.handle.send(b"late"));
    }
}
