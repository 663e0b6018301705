//! In-process transport.
//!
//! A [`MemoryHub`] plays the signaling service for any number of
//! [`MemoryTransport`]s in the same process. Tests use its controls to take
//! signaling offline, drop registrations and sever links.

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::transport::link::{Link, LinkId};
use crate::transport::{pump_frames, Dialer, Registration, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared in-process signaling service.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

struct HubState {
    online: bool,
    endpoints: HashMap<String, HubEndpoint>,
    links: Vec<HubLink>,
    registrations: usize,
    dial_attempts: usize,
}

struct HubEndpoint {
    incoming: mpsc::UnboundedSender<Link>,
    ended: CancellationToken,
}

impl HubEndpoint {
    fn is_live(&self) -> bool {
        !self.ended.is_cancelled() && !self.incoming.is_closed()
    }
}

struct HubLink {
    dialer: String,
    acceptor: String,
    closed: CancellationToken,
}

impl HubLink {
    fn touches(&self, address: &str) -> bool {
        self.dialer == address || self.acceptor == address
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    /// Create an online hub with no registrations.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                online: true,
                endpoints: HashMap::new(),
                links: Vec::new(),
                registrations: 0,
                dial_attempts: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A transport bound to this hub.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    /// Take signaling on- or offline. Existing links are unaffected.
    pub fn set_online(&self, online: bool) {
        info!("Memory hub {}", if online { "online" } else { "offline" });
        self.lock().online = online;
    }

    /// Whether `address` holds a live registration.
    pub fn is_registered(&self, address: &str) -> bool {
        self.lock()
            .endpoints
            .get(address)
            .map(HubEndpoint::is_live)
            .unwrap_or(false)
    }

    /// End the registration for `address` and every link touching it.
    pub fn drop_registration(&self, address: &str) {
        let mut state = self.lock();
        if let Some(endpoint) = state.endpoints.remove(address) {
            endpoint.ended.cancel();
        }
        for link in state.links.iter().filter(|l| l.touches(address)) {
            link.closed.cancel();
        }
        state.links.retain(|l| !l.closed.is_cancelled());
    }

    /// Close every open link touching `address`. Returns how many closed.
    pub fn sever_links(&self, address: &str) -> usize {
        let mut state = self.lock();
        let mut severed = 0;
        for link in state.links.iter().filter(|l| l.touches(address)) {
            if !link.closed.is_cancelled() {
                link.closed.cancel();
                severed += 1;
            }
        }
        state.links.retain(|l| !l.closed.is_cancelled());
        severed
    }

    /// Open links touching `address`.
    pub fn open_links(&self, address: &str) -> usize {
        self.lock()
            .links
            .iter()
            .filter(|l| l.touches(address) && !l.closed.is_cancelled())
            .count()
    }

    /// Successful registrations since creation.
    pub fn registrations(&self) -> usize {
        self.lock().registrations
    }

    /// Dial attempts since creation, successful or not.
    pub fn dial_attempts(&self) -> usize {
        self.lock().dial_attempts
    }
}

/// Transport backed by a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, local_address: &str, config: &TransportConfig) -> Result<Registration> {
        let mut state = self.hub.lock();
        if !state.online {
            return Err(Error::SignalingUnavailable("memory hub is offline".to_string()));
        }
        if state
            .endpoints
            .get(local_address)
            .map(HubEndpoint::is_live)
            .unwrap_or(false)
        {
            return Err(Error::SignalingUnavailable(format!(
                "address {} is already registered",
                local_address
            )));
        }

        let ended = CancellationToken::new();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        state.endpoints.insert(
            local_address.to_string(),
            HubEndpoint {
                incoming: incoming_tx,
                ended: ended.clone(),
            },
        );
        state.registrations += 1;
        drop(state);

        debug!("Registered {} on memory hub", local_address);
        let dialer = MemoryDialer {
            hub: self.hub.clone(),
            local_address: local_address.to_string(),
            ended: ended.clone(),
        };
        Ok(Registration::new(
            local_address,
            "memory",
            ended,
            incoming_rx,
            config.dial_timeout(),
            Arc::new(dialer),
        ))
    }
}

struct MemoryDialer {
    hub: MemoryHub,
    local_address: String,
    ended: CancellationToken,
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, remote_address: &str) -> Result<Link> {
        let mut state = self.hub.lock();
        state.dial_attempts += 1;

        if self.ended.is_cancelled() {
            return Err(Error::Dial("registration lost".to_string()));
        }
        if !state.online {
            return Err(Error::Dial("signaling unavailable".to_string()));
        }
        let target = match state.endpoints.get(remote_address) {
            Some(endpoint) if endpoint.is_live() => endpoint.incoming.clone(),
            _ => {
                return Err(Error::Dial(format!("peer {} is unavailable", remote_address)));
            }
        };

        let closed = CancellationToken::new();
        let id = LinkId::new();
        let (local_link, local_peer) = Link::open(id.clone(), remote_address, closed.clone());
        let (remote_link, remote_peer) = Link::open(id, &self.local_address, closed.clone());

        if target.send(remote_link).is_err() {
            return Err(Error::Dial(format!("peer {} is unavailable", remote_address)));
        }

        state.links.retain(|l| !l.closed.is_cancelled());
        state.links.push(HubLink {
            dialer: self.local_address.clone(),
            acceptor: remote_address.to_string(),
            closed: closed.clone(),
        });
        drop(state);

        tokio::spawn(pump_frames(
            local_peer.outbound,
            remote_peer.inbound,
            closed.clone(),
        ));
        tokio::spawn(pump_frames(remote_peer.outbound, local_peer.inbound, closed));

        debug!("Memory link {} -> {} open", self.local_address, remote_address);
        Ok(local_link)
    }
}
