//! The peer session: one login, one counterpart, any number of links.
//!
//! [`login`] authenticates, then spawns a session actor that owns all
//! session state. The returned [`SessionHandle`] sends intents to the actor;
//! the actor reports back through a stream of [`SessionEvent`]s.

mod actor;
pub mod state;

pub use state::{Backoff, SessionStatus};

use crate::chat::log::MessageLog;
use crate::chat::presence::PresenceStatus;
use crate::chat::queue::DeliveryQueue;
use crate::chat::store::{get_json, set_json, KeyValueStore, Namespace, SharedStore};
use crate::chat::types::{LastLogin, Message};
use crate::chat::ChatHandler;
use crate::config::{Config, SessionConfig, TransportConfig};
use crate::error::{Error, Result};
use crate::events::{AudioSink, LogNotifier, NotificationSink, SessionEvent, SilentAudio};
use crate::identity::{Authenticator, Identity};
use crate::transport::SharedTransport;
use actor::{Command, SessionActor};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Storage key of the last successful login.
pub const LAST_LOGIN_KEY: &str = "session/last_login";

/// Stream of events from one session.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Collaborators and settings shared by sessions.
#[derive(Clone)]
pub struct SessionContext {
    /// Credential check and counterpart lookup.
    pub authenticator: Arc<dyn Authenticator>,
    /// How links are made.
    pub transport: SharedTransport,
    /// Durable storage for history, queue and last login.
    pub store: SharedStore,
    /// Background notifications.
    pub notifier: Arc<dyn NotificationSink>,
    /// Inbound message tone.
    pub audio: Arc<dyn AudioSink>,
    /// Transport settings.
    pub transport_config: TransportConfig,
    /// Session settings.
    pub session_config: SessionConfig,
}

impl SessionContext {
    /// Context with default settings, log notifications and no sound.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        transport: SharedTransport,
        store: SharedStore,
    ) -> Self {
        Self {
            authenticator,
            transport,
            store,
            notifier: Arc::new(LogNotifier),
            audio: Arc::new(SilentAudio),
            transport_config: TransportConfig::default(),
            session_config: SessionConfig::default(),
        }
    }

    /// Take transport and session settings from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.transport_config = config.transport.clone();
        self.session_config = config.session.clone();
        self
    }

    /// Replace the notification sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the audio sink.
    pub fn with_audio(mut self, audio: Arc<dyn AudioSink>) -> Self {
        self.audio = audio;
        self
    }
}

/// Authenticate and start a session.
///
/// Fails with [`Error::Auth`] on bad credentials, before anything touches the
/// transport. Registration and the first dial happen in the background;
/// watch the returned events for the outcome.
pub async fn login(
    ctx: &SessionContext,
    login_id: &str,
    password: &str,
) -> Result<(SessionHandle, SessionEvents)> {
    let local = ctx.authenticator.resolve(login_id, password)?;
    let remote = ctx.authenticator.counterpart(&local)?;
    info!("{} logged in, counterpart {}", local.login_id, remote.login_id);

    if let Err(e) = set_json(ctx.store.as_ref(), LAST_LOGIN_KEY, &LastLogin::now(&local)) {
        warn!("Failed to remember login: {}", e);
    }

    let namespace = Namespace::new(ctx.store.clone(), &local.login_id);
    let log = MessageLog::load(namespace.clone());
    let queue = DeliveryQueue::load(namespace);
    let handler = ChatHandler::new(
        local.clone(),
        remote.clone(),
        log,
        ctx.session_config.typing_expiry(),
        ctx.session_config.max_message_length,
        ctx.notifier.clone(),
        ctx.audio.clone(),
    );

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let actor = SessionActor::new(ctx, local.clone(), remote.clone(), handler, queue, event_tx);
    tokio::spawn(actor.run(command_rx));

    Ok((
        SessionHandle {
            commands: command_tx,
            local,
            remote,
        },
        event_rx,
    ))
}

/// The last login on this machine, if recent enough to pre-fill a form.
pub fn remembered_login(store: &dyn KeyValueStore) -> Option<LastLogin> {
    match get_json::<LastLogin>(store, LAST_LOGIN_KEY) {
        Ok(Some(last)) if last.is_fresh(Utc::now()) => Some(last),
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to read last login: {}", e);
            None
        }
    }
}

/// Outcome of sending one message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// The message as logged.
    pub message: Message,
    /// Links that accepted it.
    pub delivered_links: usize,
    /// Whether it went to the delivery queue instead.
    pub queued: bool,
}

/// Everything a front end needs for a full re-render.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Connection status.
    pub status: SessionStatus,
    /// Log in display order.
    pub messages: Vec<Message>,
    /// Messages waiting for a link.
    pub pending: usize,
    /// Open links to the counterpart.
    pub open_links: usize,
    /// Counterpart presence.
    pub remote_presence: PresenceStatus,
    /// Counterpart currently shown as typing.
    pub remote_typing: Option<String>,
    /// Reconnect attempts since the last success or refresh.
    pub reconnect_attempts: u32,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

/// Handle for driving a running session.
///
/// Clones talk to the same session. When every handle is dropped the
/// session tears down its links and registration.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    local: Identity,
    remote: Identity,
}

impl SessionHandle {
    /// Our identity.
    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// The counterpart.
    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Send a chat message, or queue it if no link takes it.
    pub async fn send_message(&self, text: &str) -> Result<SendReceipt> {
        let text = text.to_string();
        self.request(|reply| Command::Send { text, reply }).await?
    }

    /// Record a keystroke in the compose box.
    pub fn keystroke(&self) -> Result<()> {
        self.command(Command::Keystroke)
    }

    /// Record whether the UI is visible. Sends presence to the counterpart.
    pub fn set_foreground(&self, foreground: bool) -> Result<()> {
        self.command(Command::SetForeground(foreground))
    }

    /// Clear the local history.
    pub async fn clear_history(&self) -> Result<()> {
        self.request(|reply| Command::ClearHistory { reply }).await
    }

    /// Reset the reconnect counter and try to connect now.
    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    /// Current state for a full re-render.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// End the session and forget the remembered login.
    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| Command::Logout { reply }).await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("local", &self.local.login_id)
            .field("remote", &self.remote.login_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
