//! Chat command - interactive terminal session.

use anyhow::{bail, Result};
use pairchat_core::platform;
use pairchat_core::{
    login, remembered_login, AudioSink, Direction, Error, Message, SessionContext, SessionEvent,
    SessionHandle, SharedStore, SledStore, StaticRegistry, TcpTransport,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

type Input = Lines<BufReader<Stdin>>;

/// Rings the terminal bell for inbound messages.
struct TerminalBell;

impl AudioSink for TerminalBell {
    fn play_tone(&self) -> pairchat_core::Result<()> {
        let mut stdout = std::io::stdout();
        stdout.write_all(b"\x07")?;
        stdout.flush()?;
        Ok(())
    }
}

enum Flow {
    Continue,
    Quit,
}

pub async fn execute(
    login_id: Option<String>,
    password: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let config = super::load_config(config_path.as_deref())?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db = Arc::new(SledStore::open(&platform::chat_db_path(&data_dir))?);
    let store: SharedStore = db.clone();

    let registry = StaticRegistry::new(config.identities.clone())?;
    let ctx = SessionContext::new(Arc::new(registry), Arc::new(TcpTransport::new()), store.clone())
        .with_config(&config)
        .with_audio(Arc::new(TerminalBell));

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let login_id = match login_id {
        Some(id) => id,
        None => {
            let remembered = remembered_login(store.as_ref()).map(|last| last.login_id);
            let prompt_text = match &remembered {
                Some(id) => format!("Login [{}]: ", id),
                None => "Login: ".to_string(),
            };
            let entered = prompt(&mut input, &prompt_text).await?;
            match (entered.is_empty(), remembered) {
                (true, Some(id)) => id,
                (true, None) => bail!("No login id given"),
                (false, _) => entered,
            }
        }
    };
    let password = match password {
        Some(password) => password,
        None => prompt(&mut input, "Password: ").await?,
    };

    let (session, mut events) = match login(&ctx, &login_id, &password).await {
        Ok(started) => started,
        Err(Error::Auth(_)) => bail!("Invalid login id or password"),
        Err(e) => return Err(e.into()),
    };

    let remote = session.remote().clone();
    println!(
        "Logged in as {} {}. Chatting with {} {}.",
        session.local().avatar,
        session.local().display_name,
        remote.avatar,
        remote.display_name
    );
    println!("Type /help for commands.");
    print_history(&session).await?;

    loop {
        tokio::select! {
            line = input.next_line() => {
                match line? {
                    Some(line) => {
                        if let Flow::Quit = handle_line(&session, line.trim()).await? {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => render(&event),
                    None => {
                        println!("Session closed.");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    // Pending messages and the log must reach disk before exit.
    if let Err(e) = db.flush() {
        warn!("Failed to flush chat database: {}", e);
    }

    Ok(())
}

async fn prompt(input: &mut Input, text: &str) -> Result<String> {
    print!("{}", text);
    std::io::stdout().flush()?;
    match input.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => bail!("Input closed"),
    }
}

async fn handle_line(session: &SessionHandle, line: &str) -> Result<Flow> {
    match line {
        "" => {}
        "/quit" => return Ok(Flow::Quit),
        "/logout" => {
            session.logout().await?;
            println!("Logged out.");
            return Ok(Flow::Quit);
        }
        "/clear" => {
            session.clear_history().await?;
        }
        "/refresh" => {
            session.refresh().await?;
            println!("Reconnecting...");
        }
        "/away" => session.set_foreground(false)?,
        "/back" => session.set_foreground(true)?,
        "/history" => print_history(session).await?,
        "/status" => print_status(session).await?,
        "/help" => print_help(),
        text => match session.send_message(text).await {
            Ok(receipt) if receipt.queued => println!("  (queued until connected)"),
            Ok(_) => {}
            Err(Error::InvalidMessage(reason)) => println!("  Not sent: {}", reason),
            Err(e) if e.is_actionable() => return Err(e.into()),
            Err(e) => warn!("Send failed: {}", e),
        },
    }
    Ok(Flow::Continue)
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged { status } => println!("-- {}", status),
        SessionEvent::MessageAppended {
            message,
            direction: Direction::Incoming,
        } => print_message(message),
        SessionEvent::MessageAppended { .. } => {}
        SessionEvent::HistoryCleared => println!("-- History cleared"),
        SessionEvent::MessageQueued { .. } => {}
        SessionEvent::PendingFlushed { count, remaining } => {
            println!("-- Delivered {} queued message(s), {} left", count, remaining)
        }
        SessionEvent::TypingChanged { user, is_typing } => {
            if *is_typing {
                println!("-- {} is typing...", user);
            }
        }
        SessionEvent::PresenceChanged { user, status } => {
            println!("-- {} is {}", user, status.as_str())
        }
        SessionEvent::LinkOpened { .. } => {}
        SessionEvent::LinkConfirmed { display_name, .. } => {
            println!("-- Connected to {}", display_name)
        }
        SessionEvent::LinkClosed { open_links, .. } => {
            if *open_links == 0 {
                println!("-- Connection lost");
            }
        }
        SessionEvent::ReconnectScheduled { attempt, delay } => {
            println!(
                "-- Reconnecting in {}s (attempt {})",
                delay.as_secs(),
                attempt
            )
        }
        SessionEvent::ReconnectExhausted { attempts } => {
            println!(
                "-- Gave up after {} attempts. Type /refresh to retry.",
                attempts
            )
        }
        SessionEvent::ConnectionFailed { error } => warn!("Connection failed: {}", error),
    }
}

fn print_message(message: &Message) {
    println!("{} {}: {}", message.avatar, message.sender_name, message.text);
}

async fn print_history(session: &SessionHandle) -> Result<()> {
    let snapshot = session.snapshot().await?;
    if snapshot.messages.is_empty() {
        return Ok(());
    }
    println!();
    for message in &snapshot.messages {
        print_message(message);
    }
    if snapshot.pending > 0 {
        println!("  ({} message(s) waiting to be delivered)", snapshot.pending);
    }
    println!();
    Ok(())
}

async fn print_status(session: &SessionHandle) -> Result<()> {
    let snapshot = session.snapshot().await?;

    println!("Session Status");
    println!("==============");
    println!("  Status: {}", snapshot.status);
    println!(
        "  {}: {}",
        session.remote().display_name,
        snapshot.remote_presence.as_str()
    );
    println!("  Open links: {}", snapshot.open_links);
    println!("  Messages: {}", snapshot.messages.len());
    println!("  Pending: {}", snapshot.pending);
    if snapshot.reconnect_attempts > 0 {
        println!("  Reconnect attempts: {}", snapshot.reconnect_attempts);
    }
    if let Some(error) = &snapshot.last_error {
        println!("  Last error: {}", error);
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  /status    Show connection status");
    println!("  /history   Show the message log");
    println!("  /refresh   Reconnect now");
    println!("  /away      Appear away");
    println!("  /back      Appear online");
    println!("  /clear     Clear local history");
    println!("  /logout    Log out and forget this login");
    println!("  /quit      Exit (stay remembered)");
}
