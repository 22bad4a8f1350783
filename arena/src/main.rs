//! `arena`: line-mode terminal client for Arena friend chat.
//!
//! Signs in with a bearer token, keeps the unread summary and (for
//! moderators) the pending-request badge fresh, and chats with one friend
//! at a time over the real-time channel. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/arena/config.toml`).
//!
//! ```bash
//! # Against a local development backend
//! cargo run -p arena-mock &
//! cargo run --bin arena -- --api-url http://127.0.0.1:8080/api \
//!     --ws-url ws://127.0.0.1:8080/ws --token alice-token \
//!     --username alice --user-id 1 --with bob
//! ```

use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use arena::api::ApiError;
use arena::api::http::HttpApi;
use arena::app::{self, HELP, Input};
use arena::badge::PendingBadgePoller;
use arena::channel::manager::ChannelManager;
use arena::channel::stomp::StompConnector;
use arena::channel::{ChannelError, Transcript, TranscriptCursor, active_conversation};
use arena::config::{CliArgs, ClientConfig};
use arena::conversation::{ConversationView, LoadStatus};
use arena::session::{LogoutReason, Session, SessionStore};
use arena::unread::UnreadPoller;
use arena_proto::model::{ChatMessage, UserId};

type View = ConversationView<HttpApi, StompConnector>;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout is the chat surface.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(session) = config.to_session() else {
        eprintln!(
            "error: a token, username and user id are required \
             (--token/--username/--user-id or ARENA_TOKEN/ARENA_USERNAME/ARENA_USER_ID)"
        );
        return ExitCode::FAILURE;
    };

    tracing::info!(username = %session.user.username, "arena starting");
    let result = run(&config, session).await;
    tracing::info!("arena exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("arena.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

#[allow(clippy::too_many_lines)]
async fn run(config: &ClientConfig, session: Session) -> Result<(), StartupError> {
    let me = session.user.id.clone();
    let store = SessionStore::signed_in(session);

    let api = Arc::new(HttpApi::new(
        &config.api_base_url,
        config.endpoints.clone(),
        config.request_timeout,
    )?);
    let connector = StompConnector::new(&config.ws_url, config.connect_timeout)?;

    let (writer, reader) = active_conversation();
    let transcript = Transcript::new();
    let channel = Arc::new(ChannelManager::new(
        connector,
        store.clone(),
        config.channel.clone(),
        reader,
        transcript.clone(),
    ));
    let view: Arc<View> = Arc::new(ConversationView::new(
        Arc::clone(&api),
        store.clone(),
        Arc::clone(&channel),
        writer,
        transcript.clone(),
    ));
    let unread = UnreadPoller::spawn(
        Arc::clone(&api),
        config.unread_poller_config(store.token()),
    );
    let badge = PendingBadgePoller::spawn(Arc::clone(&api), store.clone(), config.badge_interval);

    let mut session_rx = store.subscribe();
    let mut transcript_rx = transcript.subscribe();
    let mut status_rx = view.subscribe_status();
    let mut connected_rx = channel.subscribe_connected();
    let mut unread_rx = unread.subscribe();
    let mut badge_rx = badge.subscribe();

    channel.activate();
    println!(
        "signed in as {} - type /help for commands",
        config.username.as_deref().unwrap_or("?")
    );

    refresh_friends(&view, false).await;
    if let Some(outcome) = view.apply_deep_link(config.with.as_deref()).await {
        tracing::debug!(?outcome, "deep link applied");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut cursor = TranscriptCursor::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                match app::parse_input(&line) {
                    Input::Send(text) => send(&view, &channel, &text),
                    Input::With(name) => open_conversation(&view, &name).await,
                    Input::Friends => refresh_friends(&view, true).await,
                    Input::Unread => print_lines(&app::format_unread(&unread.summary())),
                    Input::Read(sender) => match unread.mark_read_from_sender(&sender).await {
                        Ok(()) => println!("marked messages from {sender} as read"),
                        Err(e) => println!("could not mark messages read: {e}"),
                    },
                    Input::Help => println!("{HELP}"),
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Invalid(hint) => println!("{hint}"),
                }
            }
            Ok(()) = transcript_rx.changed() => {
                let snapshot = transcript_rx.borrow_and_update().clone();
                let fresh = cursor.advance(&snapshot);
                print_transcript(&view, &me, fresh, &config.timestamp_format);
            }
            Ok(()) = status_rx.changed() => {
                let status = status_rx.borrow_and_update().clone();
                match status {
                    LoadStatus::Loading => {
                        if let Some(peer) = view.selected() {
                            println!("opening conversation with {}...", peer.username);
                        }
                    }
                    LoadStatus::Ready => {
                        if view.transcript().is_empty() {
                            println!("no messages yet");
                        }
                    }
                    LoadStatus::Error(reason) => println!("could not open conversation: {reason}"),
                    LoadStatus::Idle => {}
                }
            }
            Ok(()) = connected_rx.changed() => {
                let connected = *connected_rx.borrow_and_update();
                println!("{}", if connected { "* connected" } else { "* disconnected, reconnecting" });
            }
            Ok(()) = unread_rx.changed() => {
                let total = unread_rx.borrow_and_update().total_unread;
                if total > 0 {
                    println!("* {total} unread (/unread for details)");
                }
            }
            Ok(()) = badge_rx.changed() => {
                let pending = *badge_rx.borrow_and_update();
                println!("* {pending} requests awaiting review");
            }
            Ok(()) = session_rx.changed() => {
                let expired = store.logout_reason() == Some(LogoutReason::Expired);
                session_rx.borrow_and_update();
                if expired {
                    println!("session expired, please sign in again");
                    break;
                }
            }
        }
    }

    channel.deactivate().await;
    unread.shutdown().await;
    drop(badge);
    Ok(())
}

fn send(view: &View, channel: &ChannelManager<StompConnector>, text: &str) {
    if view.send(text) {
        return;
    }
    if view.selected().is_none() {
        println!("no conversation open, use /with <username>");
    } else if !channel.is_connected() {
        println!("not connected, message not sent");
    } else if view.active_conversation().is_none() {
        println!("conversation still loading, message not sent");
    }
}

async fn open_conversation(view: &Arc<View>, name: &str) {
    let find = |view: &View| {
        view.friends()
            .into_iter()
            .find(|f| f.username.eq_ignore_ascii_case(name))
    };
    let friend = match find(view.as_ref()) {
        Some(friend) => Some(friend),
        None => {
            refresh_friends(view, false).await;
            find(view.as_ref())
        }
    };
    let Some(friend) = friend else {
        println!("no friend named {name}");
        return;
    };
    // Selection runs in the background so a newer /with can supersede it.
    let view = Arc::clone(view);
    tokio::spawn(async move {
        let outcome = view.select_peer(friend).await;
        tracing::debug!(?outcome, "selection finished");
    });
}

async fn refresh_friends(view: &View, print: bool) {
    match view.load_friends().await {
        Ok(friends) if print => print_lines(&app::format_friends(&friends)),
        Ok(_) => {}
        Err(e) => println!("could not load friends: {e}"),
    }
}

/// Prints `messages` with the current clock prefix.
fn print_transcript(
    view: &View,
    me: &UserId,
    messages: &[ChatMessage],
    timestamp_format: &str,
) {
    let peer = view.selected();
    let now = clock(timestamp_format);
    for message in messages {
        println!("{}", app::format_message(message, me, peer.as_ref(), &now));
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Formats the local time; falls back to a placeholder on a bad format.
fn clock(format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", chrono::Local::now().format(format)).is_err() {
        return "--:--".to_string();
    }
    out
}
