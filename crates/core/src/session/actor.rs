//! Session actor: the single owner of session state.
//!
//! Registration and dials run in spawned tasks and report back tagged with
//! the epoch they started in. The epoch moves on every reconnect attempt,
//! refresh and logout, so late completions are recognised and dropped.

use super::{SendReceipt, SessionContext, Snapshot, LAST_LOGIN_KEY};
use crate::chat::presence::{deadline_after, PresenceStatus, TypingEmitter, TypingSignal};
use crate::chat::queue::DeliveryQueue;
use crate::chat::store::SharedStore;
use crate::chat::types::Message;
use crate::chat::ChatHandler;
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::identity::Identity;
use crate::protocol::Payload;
use crate::session::state::{Backoff, SessionStatus};
use crate::transport::{Incoming, Link, LinkHandle, LinkId, Registration, SharedTransport};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Intents from a [`super::SessionHandle`].
pub(crate) enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<SendReceipt>>,
    },
    Keystroke,
    SetForeground(bool),
    ClearHistory {
        reply: oneshot::Sender<()>,
    },
    Refresh {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
}

/// Reports from spawned tasks.
enum Internal {
    Registered {
        epoch: u64,
        result: Result<Registration>,
    },
    Dialed {
        epoch: u64,
        result: Result<Link>,
    },
    Inbound(Link),
    RegistrationLost {
        serial: u64,
    },
    Frame {
        link_id: LinkId,
        data: Vec<u8>,
    },
    LinkClosed {
        link_id: LinkId,
    },
}

pub(crate) struct SessionActor {
    local: Identity,
    remote: Identity,
    transport: SharedTransport,
    transport_config: TransportConfig,
    store: SharedStore,
    handler: ChatHandler,
    queue: DeliveryQueue,
    typing: TypingEmitter,
    status: SessionStatus,
    backoff: Backoff,
    exhausted_reported: bool,
    epoch: u64,
    registration: Option<(u64, Registration)>,
    registration_serial: u64,
    registering: bool,
    reconnecting: bool,
    links: HashMap<LinkId, LinkHandle>,
    reconnect_at: Option<Instant>,
    last_error: Option<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    pub(crate) fn new(
        ctx: &SessionContext,
        local: Identity,
        remote: Identity,
        handler: ChatHandler,
        queue: DeliveryQueue,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let config = &ctx.session_config;
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        Self {
            local,
            remote,
            transport: ctx.transport.clone(),
            transport_config: ctx.transport_config.clone(),
            store: ctx.store.clone(),
            handler,
            queue,
            typing: TypingEmitter::new(config.typing_idle()),
            status: SessionStatus::Idle,
            backoff: Backoff::new(config.reconnect_base_delay(), config.max_reconnect_attempts),
            exhausted_reported: false,
            epoch: 0,
            registration: None,
            registration_serial: 0,
            registering: false,
            reconnecting: false,
            links: HashMap::new(),
            reconnect_at: None,
            last_error: None,
            events,
            internal_tx,
            internal_rx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.set_status(SessionStatus::Connecting);
        self.begin_registration();

        loop {
            let reconnect_at = self.reconnect_at;
            let typing_idle_at = self.typing.deadline();
            let typing_expiry_at = self.handler.typing_deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Logout { reply }) => {
                        self.shutdown(true);
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All session handles dropped");
                        self.shutdown(false);
                        break;
                    }
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                _ = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    self.attempt_reconnect();
                }
                _ = sleep_until_opt(typing_idle_at) => {
                    if let Some(signal) = self.typing.poll_idle(Instant::now()) {
                        self.broadcast_typing(signal);
                    }
                }
                _ = sleep_until_opt(typing_expiry_at) => {
                    if let Some(event) = self.handler.check_typing_expired(Instant::now()) {
                        self.emit(event);
                    }
                }
            }
        }

        info!("Session for {} ended", self.local.login_id);
    }

    // ==================== Commands ====================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { text, reply } => {
                let _ = reply.send(self.send_message(&text));
            }
            Command::Keystroke => {
                if let Some(signal) = self.typing.keystroke(Instant::now()) {
                    self.broadcast_typing(signal);
                }
            }
            Command::SetForeground(foreground) => self.set_foreground(foreground),
            Command::ClearHistory { reply } => {
                let event = self.handler.clear_history();
                self.emit(event);
                let _ = reply.send(());
            }
            Command::Refresh { reply } => {
                info!("Manual refresh");
                self.backoff.reset();
                self.exhausted_reported = false;
                self.reconnect_at = None;
                self.attempt_reconnect();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Logout { reply } => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }

    fn send_message(&mut self, text: &str) -> Result<SendReceipt> {
        let message = self.handler.compose(text)?;

        if let Some(signal) = self.typing.stop() {
            self.broadcast_typing(signal);
        }
        if let Some(event) = self.handler.record_outgoing(message.clone()) {
            self.emit(event);
        }

        // Older queued messages go first.
        if !self.queue.is_empty() {
            self.flush_pending();
        }
        let delivered_links = if self.queue.is_empty() {
            self.broadcast_message(&message)
        } else {
            0
        };

        let queued = delivered_links == 0;
        if queued {
            debug!("No link accepted message {}, queuing", message.id);
            self.queue.enqueue(message.clone());
            self.emit(SessionEvent::MessageQueued {
                message_id: message.id.clone(),
            });
        }

        Ok(SendReceipt {
            message,
            delivered_links,
            queued,
        })
    }

    fn set_foreground(&mut self, foreground: bool) {
        if self.handler.is_foreground() == foreground {
            return;
        }
        self.handler.set_foreground(foreground);
        let status = if foreground {
            PresenceStatus::Online
        } else {
            PresenceStatus::Away
        };
        let payload = Payload::presence(&self.local, status, Utc::now().timestamp_millis());
        self.broadcast(&payload);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            messages: self.handler.messages().to_vec(),
            pending: self.queue.len(),
            open_links: self.open_links(),
            remote_presence: self.handler.remote_presence(),
            remote_typing: self.handler.remote_typing().map(str::to_string),
            reconnect_attempts: self.backoff.attempts(),
            last_error: self.last_error.clone(),
        }
    }

    // ==================== Internal Events ====================

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Registered { epoch, result } => self.on_registered(epoch, result),
            Internal::Dialed { epoch, result } => self.on_dialed(epoch, result),
            Internal::Inbound(link) => {
                debug!("Inbound link from {}", link.handle.remote_address());
                self.adopt_link(link, true);
            }
            Internal::RegistrationLost { serial } => self.on_registration_lost(serial),
            Internal::Frame { link_id, data } => {
                debug!("Frame on link {} ({} bytes)", link_id, data.len());
                let (_, events) = self.handler.handle_frame(&data, Instant::now());
                for event in events {
                    self.emit(event);
                }
            }
            Internal::LinkClosed { link_id } => self.on_link_closed(link_id),
        }
    }

    fn on_registered(&mut self, epoch: u64, result: Result<Registration>) {
        if epoch != self.epoch {
            debug!("Ignoring registration from epoch {}", epoch);
            if let Ok(registration) = result {
                registration.close();
            }
            return;
        }
        self.registering = false;

        match result {
            Ok(registration) => {
                info!(
                    "Registered {} via {}",
                    registration.local_address(),
                    registration.server()
                );
                self.adopt_registration(registration);
                if !self.reconnecting {
                    self.set_status(SessionStatus::Ready);
                    self.flush_pending();
                }
                self.begin_dial();
            }
            Err(e) => {
                warn!("Registration failed: {}", e);
                if self.open_links() == 0 {
                    self.connection_failed(&e);
                    self.enter_degraded();
                } else {
                    self.reconnecting = false;
                }
            }
        }
    }

    fn on_dialed(&mut self, epoch: u64, result: Result<Link>) {
        match result {
            Ok(link) if epoch != self.epoch => {
                debug!("Closing link from stale dial (epoch {})", epoch);
                link.handle.close();
            }
            Ok(link) => self.adopt_link(link, false),
            Err(e) if epoch != self.epoch => {
                debug!("Ignoring dial failure from epoch {}: {}", epoch, e);
            }
            Err(e) => {
                warn!("Dial to {} failed: {}", self.remote.network_address, e);
                // An open link keeps the session usable.
                if self.open_links() == 0 {
                    self.connection_failed(&e);
                    self.enter_degraded();
                } else {
                    self.reconnecting = false;
                }
            }
        }
    }

    fn on_registration_lost(&mut self, serial: u64) {
        let current = matches!(&self.registration, Some((s, _)) if *s == serial);
        if !current || self.status.is_terminal() {
            return;
        }
        warn!("Registration for {} lost", self.local.network_address);
        if self.open_links() == 0 && !self.reconnecting {
            self.enter_degraded();
        }
    }

    fn on_link_closed(&mut self, link_id: LinkId) {
        let Some(handle) = self.links.remove(&link_id) else {
            return;
        };
        debug!("{}", Error::LinkClosed(handle.remote_address().to_string()));
        let open_links = self.open_links();
        self.emit(SessionEvent::LinkClosed {
            remote_address: handle.remote_address().to_string(),
            open_links,
        });

        if open_links == 0 && !self.status.is_terminal() {
            for event in self.handler.peer_unreachable() {
                self.emit(event);
            }
            if !self.reconnecting {
                self.enter_degraded();
            }
        }
    }

    // ==================== Connection Lifecycle ====================

    fn begin_registration(&mut self) {
        self.registering = true;
        let epoch = self.epoch;
        let transport = self.transport.clone();
        let config = self.transport_config.clone();
        let address = self.local.network_address.clone();
        let tx = self.internal_tx.clone();

        debug!("Registering {} (epoch {})", address, epoch);
        tokio::spawn(async move {
            let result = transport.open(&address, &config).await;
            let _ = tx.send(Internal::Registered { epoch, result });
        });
    }

    fn adopt_registration(&mut self, registration: Registration) {
        self.registration_serial += 1;
        let serial = self.registration_serial;
        if let Some(incoming) = registration.listen() {
            tokio::spawn(forward_incoming(
                serial,
                registration.clone(),
                incoming,
                self.internal_tx.clone(),
            ));
        }
        if let Some((_, old)) = self.registration.replace((serial, registration)) {
            old.close();
        }
    }

    fn begin_dial(&mut self) {
        let Some((_, registration)) = &self.registration else {
            return;
        };
        let registration = registration.clone();
        let epoch = self.epoch;
        let transport = self.transport.clone();
        let remote = self.remote.network_address.clone();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = transport.dial(&registration, &remote).await;
            let _ = tx.send(Internal::Dialed { epoch, result });
        });
    }

    fn attempt_reconnect(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.reconnecting = true;
        if self.registering {
            debug!("Registration already in flight");
            return;
        }

        self.epoch += 1;
        if self.open_links() == 0 {
            self.set_status(SessionStatus::Connecting);
        }
        info!(
            "Reconnect attempt {} (epoch {})",
            self.backoff.attempts(),
            self.epoch
        );

        let registered = self
            .registration
            .as_ref()
            .map(|(_, registration)| !registration.is_lost())
            .unwrap_or(false);
        if registered {
            self.begin_dial();
        } else {
            if let Some((_, old)) = self.registration.take() {
                old.close();
            }
            self.begin_registration();
        }
    }

    fn enter_degraded(&mut self) {
        self.reconnecting = false;
        self.set_status(SessionStatus::Degraded);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        match self.backoff.next_attempt() {
            Some((attempt, delay)) => {
                info!("Reconnect attempt {} in {:?}", attempt, delay);
                self.reconnect_at = Some(deadline_after(Instant::now(), delay));
                self.emit(SessionEvent::ReconnectScheduled { attempt, delay });
            }
            None if !self.exhausted_reported => {
                let attempts = self.backoff.attempts();
                let error = Error::ReconnectExhausted(attempts);
                warn!("{}", error);
                self.exhausted_reported = true;
                self.last_error = Some(error.to_string());
                self.emit(SessionEvent::ReconnectExhausted { attempts });
            }
            None => {}
        }
    }

    fn connection_failed(&mut self, error: &Error) {
        self.last_error = Some(error.to_string());
        self.emit(SessionEvent::ConnectionFailed {
            error: error.to_string(),
        });
    }

    fn adopt_link(&mut self, link: Link, inbound: bool) {
        let Link {
            handle,
            inbound: frames,
        } = link;

        if self.status.is_terminal() {
            handle.close();
            return;
        }
        if handle.remote_address() != self.remote.network_address {
            warn!(
                "Rejecting link from unexpected address {}",
                handle.remote_address()
            );
            handle.close();
            return;
        }
        if !handle.is_open() {
            debug!("Link {} closed before adoption", handle.id());
            return;
        }

        let link_id = handle.id().clone();
        tokio::spawn(pump_link(
            link_id.clone(),
            handle.clone(),
            frames,
            self.internal_tx.clone(),
        ));
        self.links.insert(link_id, handle.clone());
        info!(
            "Link to {} open ({}, {} total)",
            handle.remote_address(),
            if inbound { "inbound" } else { "outbound" },
            self.open_links()
        );
        self.emit(SessionEvent::LinkOpened {
            remote_address: handle.remote_address().to_string(),
            inbound,
        });

        let handshake = Payload::handshake(&self.local, Utc::now().timestamp_millis());
        match handshake.encode() {
            Ok(frame) => {
                if !handle.send(&frame) {
                    debug!("Handshake not sent on link {}", handle.id());
                }
            }
            Err(e) => warn!("Failed to encode handshake: {}", e),
        }

        self.backoff.reset();
        self.exhausted_reported = false;
        self.reconnect_at = None;
        self.reconnecting = false;
        self.last_error = None;
        self.set_status(SessionStatus::Ready);
        self.flush_pending();
    }

    fn shutdown(&mut self, forget_login: bool) {
        self.epoch += 1;
        if let Some(signal) = self.typing.stop() {
            self.broadcast_typing(signal);
        }
        for (_, handle) in self.links.drain() {
            handle.close();
        }
        if let Some((_, registration)) = self.registration.take() {
            registration.close();
        }
        self.reconnect_at = None;
        self.set_status(SessionStatus::Closed);

        if forget_login {
            if let Err(e) = self.store.remove(LAST_LOGIN_KEY) {
                warn!("Failed to forget login: {}", e);
            }
            info!("{} logged out", self.local.login_id);
        }
    }

    // ==================== Sending ====================

    fn open_handles(&self) -> Vec<LinkHandle> {
        self.links
            .values()
            .filter(|handle| handle.is_open())
            .cloned()
            .collect()
    }

    fn open_links(&self) -> usize {
        self.links.values().filter(|handle| handle.is_open()).count()
    }

    /// Send on every open link. Returns how many accepted.
    fn broadcast(&self, payload: &Payload) -> usize {
        let frame = match payload.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {} payload: {}", payload.kind(), e);
                return 0;
            }
        };
        self.open_handles()
            .iter()
            .filter(|handle| self.transport.send(handle, &frame))
            .count()
    }

    fn broadcast_message(&self, message: &Message) -> usize {
        self.broadcast(&Payload::Message(message.clone()))
    }

    fn broadcast_typing(&self, signal: TypingSignal) {
        let payload = Payload::typing(&self.local, signal == TypingSignal::Start);
        self.broadcast(&payload);
    }

    fn flush_pending(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let handles = self.open_handles();
        if handles.is_empty() {
            return;
        }

        let transport = &self.transport;
        let report = self.queue.flush(|message| match Payload::Message(message.clone()).encode() {
            Ok(frame) => handles
                .iter()
                .filter(|handle| transport.send(handle, &frame))
                .count()
                > 0,
            Err(e) => {
                warn!("Failed to encode queued message {}: {}", message.id, e);
                false
            }
        });

        if report.delivered > 0 {
            info!(
                "Flushed {} pending message(s), {} remaining",
                report.delivered, report.remaining
            );
            self.emit(SessionEvent::PendingFlushed {
                count: report.delivered,
                remaining: report.remaining,
            });
        }
    }

    // ==================== Events ====================

    fn set_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        info!("Session {} -> {}", self.status, status);
        self.status = status;
        self.emit(SessionEvent::StatusChanged { status });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Forward inbound links until the registration ends.
async fn forward_incoming(
    serial: u64,
    registration: Registration,
    mut incoming: Incoming,
    tx: mpsc::UnboundedSender<Internal>,
) {
    loop {
        tokio::select! {
            biased;
            link = incoming.next() => match link {
                Some(link) => {
                    if tx.send(Internal::Inbound(link)).is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = registration.lost() => break,
        }
    }
    let _ = tx.send(Internal::RegistrationLost { serial });
}

/// Forward frames from one link until it closes.
async fn pump_link(
    link_id: LinkId,
    handle: LinkHandle,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::UnboundedSender<Internal>,
) {
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(data) => {
                    let frame = Internal::Frame {
                        link_id: link_id.clone(),
                        data,
                    };
                    if tx.send(frame).is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = handle.closed() => break,
        }
    }
    handle.close();
    let _ = tx.send(Internal::LinkClosed { link_id });
}
