//! `TeamChat` sync engine debug console.
//!
//! Starts the engine against a real server and exposes its command surface
//! as a line-oriented console: list chats, send messages, watch the outbox
//! drain, search, and observe realtime events as they apply. Configuration
//! via CLI flags, environment variables, or config file
//! (`~/.config/teamchat/config.toml`).
//!
//! ```bash
//! # Connect to a server
//! cargo run --bin teamchat -- --server-url http://127.0.0.1:4000/ \
//!     --auth-token dev-token
//!
//! # Or via environment variables
//! TEAMCHAT_SERVER=http://127.0.0.1:4000/ TEAMCHAT_TOKEN=dev-token cargo run
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use url::Url;

use teamchat::backend::{Backend, HttpBackend, MediaService, RestMedia, StaticToken};
use teamchat::config::{CliArgs, ClientConfig};
use teamchat::outbox::{FileOutboxStorage, OutboxStorage};
use teamchat::realtime::ConnectionState;
use teamchat::search::{ClipCatalog, NoClips};
use teamchat::sync::{self, EngineConfig, SyncEvent, SyncHandle};
use teamchat_api::chat::ChatPatch;
use teamchat_api::ids::UserId;
use teamchat_api::message::MessageStatus;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env vars > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("teamchat starting");

    let Some(session) = config.to_session_config() else {
        eprintln!("No server configured. Pass --server-url and --auth-token,");
        eprintln!("or set TEAMCHAT_SERVER and TEAMCHAT_TOKEN.");
        std::process::exit(2);
    };

    let server_url = match Url::parse(&session.server_url) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid server URL {}: {e}", session.server_url);
            std::process::exit(2);
        }
    };

    let data_dir = match config.resolve_data_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Cannot determine data directory: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Cannot create data directory {}: {e}", data_dir.display());
        std::process::exit(1);
    }
    let storage = FileOutboxStorage::new(data_dir.join("outbox.bin"));

    let backend = match HttpBackend::new(server_url.clone(), StaticToken::new(session.auth_token.clone()))
    {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    // The uploader holds its own client pool and backend handle.
    let media_backend = match HttpBackend::new(server_url.clone(), StaticToken::new(session.auth_token))
    {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    let media = match RestMedia::new(Arc::new(media_backend)) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    let engine_config = EngineConfig {
        server_url,
        sync: config.sync.clone(),
        reconnect: config.reconnect.clone(),
    };
    let (handle, events) = sync::start(backend, media, NoClips, storage, engine_config).await;

    let result = run_console(&handle, events).await;

    handle.shutdown().await;
    tracing::info!("teamchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which belongs to the console).
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("teamchat.log");
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

/// Read console commands and engine events concurrently until quit or EOF.
async fn run_console<B, M, K, S>(
    handle: &SyncHandle<B, M, K, S>,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
) -> io::Result<()>
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    println!("teamchat console. Type 'help' for commands.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if !handle_command(handle, line.trim()).await {
                    return Ok(());
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                print_event(handle, &event);
            }
        }
    }
}

/// Execute one console command. Returns `false` when the user quits.
#[allow(clippy::too_many_lines)]
async fn handle_command<B, M, K, S>(handle: &SyncHandle<B, M, K, S>, line: &str) -> bool
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };
    let args: Vec<&str> = parts.collect();

    match command {
        "quit" | "exit" => return false,
        "help" => print_help(),
        "status" => {
            let connection = match handle.connection_state() {
                ConnectionState::Connected => "connected".to_string(),
                ConnectionState::Connecting => "connecting".to_string(),
                ConnectionState::Disconnected => "disconnected".to_string(),
                ConnectionState::Failed(reason) => format!("failed ({reason})"),
            };
            let who = handle
                .identity()
                .map_or_else(|| "<unresolved>".to_string(), |p| p.name);
            println!(
                "user: {who} | stream: {connection} | outbox: {} | unread: {}",
                handle.outbox_len(),
                handle.unread_total()
            );
        }
        "chats" => {
            let chats = handle.chats();
            if chats.is_empty() {
                println!("no chats");
            }
            for (i, chat) in chats.iter().enumerate() {
                let mut flags = String::new();
                if chat.pinned {
                    flags.push_str(" [pinned]");
                }
                if chat.muted {
                    flags.push_str(" [muted]");
                }
                let preview = chat.last_message_preview.as_deref().unwrap_or("");
                println!(
                    "{i:>3}. {} ({} unread){flags} {preview}",
                    chat.title, chat.unread_count
                );
            }
        }
        "msgs" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            for msg in handle.messages(chat.id) {
                println!(
                    "  {} {} {}: {}",
                    format_timestamp_ms(msg.created_at.as_millis()),
                    status_tag(msg.status),
                    msg.sender_name,
                    msg.text
                );
            }
        }
        "send" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            let text = args[1..].join(" ");
            match handle.send_text(chat.id, text, None).await {
                Ok(id) => println!("queued {id}"),
                Err(e) => println!("send rejected: {e}"),
            }
        }
        "retry" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            let failed: Vec<_> = handle
                .messages(chat.id)
                .into_iter()
                .filter(|m| m.status == MessageStatus::Failed)
                .collect();
            if failed.is_empty() {
                println!("nothing to retry in {}", chat.title);
            }
            for msg in failed {
                match handle.retry_message(msg.id).await {
                    Ok(()) => println!("retrying {}", msg.id),
                    Err(e) => println!("retry rejected: {e}"),
                }
            }
        }
        "direct" => {
            let Some(peer) = args.first() else {
                println!("usage: direct <user-id>");
                return true;
            };
            let chat_id = handle
                .create_direct_chat((*peer).to_string(), UserId::new(*peer))
                .await;
            println!("created {chat_id}");
        }
        "group" => {
            let Some((title, members)) = args.split_first() else {
                println!("usage: group <title> <user-id>...");
                return true;
            };
            let participants = members.iter().map(|m| UserId::new(*m)).collect();
            let chat_id = handle
                .create_group_chat((*title).to_string(), participants)
                .await;
            println!("created {chat_id}");
        }
        "pin" | "unpin" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            if let Err(e) = handle
                .update_chat(chat.id, ChatPatch::pin(command == "pin"))
                .await
            {
                println!("update rejected: {e}");
            }
        }
        "mute" | "unmute" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            if let Err(e) = handle
                .update_chat(chat.id, ChatPatch::mute(command == "mute"))
                .await
            {
                println!("update rejected: {e}");
            }
        }
        "archive" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            if let Err(e) = handle.update_chat(chat.id, ChatPatch::archive(true)).await {
                println!("update rejected: {e}");
            }
        }
        "read" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            if let Err(e) = handle.mark_chat_read(chat.id).await {
                println!("mark-read rejected: {e}");
            }
        }
        "older" => {
            let Some(chat) = chat_at(handle, args.first()) else {
                return true;
            };
            handle.load_older_messages(chat.id).await;
        }
        "more" => handle.load_more_chats().await,
        "refresh" => handle.refresh_chats().await,
        "search" => {
            handle.search(&args.join(" ")).await;
        }
        other => println!("unknown command '{other}', try 'help'"),
    }
    true
}

/// Resolve a chat list index argument against the current sorted list.
fn chat_at<B, M, K, S>(
    handle: &SyncHandle<B, M, K, S>,
    arg: Option<&&str>,
) -> Option<teamchat_api::chat::Chat>
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    let Some(index) = arg.and_then(|a| a.parse::<usize>().ok()) else {
        println!("expected a chat index (see 'chats')");
        return None;
    };
    let chats = handle.chats();
    if index >= chats.len() {
        println!("no chat at index {index}");
        return None;
    }
    chats.into_iter().nth(index)
}

/// Print one engine event on its own line, prefixed so it stands apart
/// from command output.
fn print_event<B, M, K, S>(handle: &SyncHandle<B, M, K, S>, event: &SyncEvent)
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    match event {
        SyncEvent::ChatsChanged => println!("* chat list changed"),
        SyncEvent::MessagesChanged(chat_id) => {
            let title = handle
                .chats()
                .into_iter()
                .find(|c| c.id == *chat_id)
                .map_or_else(|| chat_id.to_string(), |c| c.title);
            println!("* messages changed in {title}");
        }
        SyncEvent::MessageStatusChanged { message_id, status } => {
            println!("* message {message_id} -> {}", status_tag(*status));
        }
        SyncEvent::OutboxCountChanged(count) => println!("* outbox: {count} pending"),
        SyncEvent::ConnectionChanged(state) => match state {
            ConnectionState::Connected => println!("* stream connected"),
            ConnectionState::Connecting => println!("* stream connecting..."),
            ConnectionState::Disconnected => println!("* stream disconnected"),
            ConnectionState::Failed(reason) => println!("* stream failed: {reason}"),
        },
        SyncEvent::SendFailed { message_id, reason } => {
            println!("* send failed for {message_id}: {reason}");
        }
        SyncEvent::SearchResults(results) => {
            println!("* search results ({}):", results.len());
            for r in results {
                println!("    [{:?}] {} {}", r.kind, r.title, r.subtitle);
            }
        }
        SyncEvent::IdentityResolved(profile) => {
            println!("* signed in as {}", profile.name);
        }
    }
}

/// Short status marker shown next to each message.
const fn status_tag(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Queued => "[queued]",
        MessageStatus::Uploading => "[uploading]",
        MessageStatus::Sent => "[sent]",
        MessageStatus::Delivered => "[delivered]",
        MessageStatus::Read => "[read]",
        MessageStatus::Failed => "[FAILED]",
    }
}

fn print_help() {
    println!("commands:");
    println!("  chats                  list chats (index, unread, preview)");
    println!("  msgs <n>               show messages of chat n");
    println!("  send <n> <text>        send a text message to chat n");
    println!("  retry <n>              retry failed messages in chat n");
    println!("  direct <user-id>       create a direct chat");
    println!("  group <title> <id>...  create a group chat");
    println!("  pin|unpin <n>          toggle pin on chat n");
    println!("  mute|unmute <n>        toggle mute on chat n");
    println!("  archive <n>            archive chat n");
    println!("  read <n>               mark chat n read");
    println!("  older <n>              load older history for chat n");
    println!("  more | refresh         page / refresh the chat list");
    println!("  search <query>         search chats, messages and clips");
    println!("  status                 connection, outbox and unread state");
    println!("  quit                   exit");
}

/// Format an epoch-millisecond timestamp as "HH:MM".
fn format_timestamp_ms(ms: u64) -> String {
    use chrono::{Local, TimeZone};
    let secs = (ms / 1000).cast_signed();
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M").to_string(),
        _ => "??:??".to_string(),
    }
}
