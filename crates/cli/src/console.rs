//! Line-oriented agent console: reads commands from stdin and prints
//! session updates as they arrive.

use chrono::{DateTime, Local, Utc};
use hub::SessionHandle;
use proto::{ChatMessage, UserId};
use session::{ChatRequest, ConnectionState, SessionSnapshot, SessionUpdate};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::signal::wait_for_shutdown;

const PROMPT: &str = "agentdesk> ";

const HELP: &str = "\
Commands:
  /requests          list waiting chat requests
  /pickup <user>     claim a waiting request
  /history [user]    show a transcript (defaults to the active chat)
  /status            connection and active chat
  /help              this help
  /quit              leave the console
Any other line is sent to the active chat.";

/// One parsed console input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Requests,
    Pickup(String),
    History(Option<String>),
    Status,
    Help,
    Quit,
    /// Free text for the active chat.
    Say(String),
}

/// Parses a console line. Blank lines yield `Ok(None)`; malformed commands
/// yield the message to show instead.
pub fn parse_line(raw: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(ConsoleCommand::Say(line.to_string())));
    }

    let mut parts = line.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::to_string);
    if parts.next().is_some() {
        return Err(format!("{name} takes at most one argument"));
    }

    let command = match name {
        "/requests" => ConsoleCommand::Requests,
        "/pickup" => ConsoleCommand::Pickup(argument.ok_or("usage: /pickup <user>")?),
        "/history" => ConsoleCommand::History(argument),
        "/status" => ConsoleCommand::Status,
        "/help" => ConsoleCommand::Help,
        "/quit" | "/exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command {other} (try /help)")),
    };
    Ok(Some(command))
}

/// Turns session updates into console lines.
pub struct ConsoleView {
    agent: String,
    connection: ConnectionState,
}

impl ConsoleView {
    pub fn new(agent: impl Into<String>, connection: ConnectionState) -> Self {
        Self {
            agent: agent.into(),
            connection,
        }
    }

    pub fn render(&mut self, update: &SessionUpdate) -> Option<String> {
        match update {
            SessionUpdate::Connection(next) => {
                let previous = std::mem::replace(&mut self.connection, *next);
                let line = match next {
                    ConnectionState::Live if matches!(previous, ConnectionState::Reconnecting { .. }) => {
                        "[connection] live again; requests sent while offline may be missing".to_string()
                    }
                    ConnectionState::Reconnecting { attempt } => {
                        format!("[connection] lost, reconnecting (attempt {attempt})")
                    }
                    ConnectionState::Disconnected => "[connection] disconnected".to_string(),
                    other => format!("[connection] {other}"),
                };
                Some(line)
            }
            SessionUpdate::ChatRequested(request) => Some(format!(
                "[request] {} is waiting ({}). Type /pickup {}",
                request.requester, request.chat_type, request.requester
            )),
            SessionUpdate::ChatClosed {
                requester,
                was_active,
            } => Some(if *was_active {
                format!("[closed] {requester} left; the active chat has ended")
            } else {
                format!("[closed] {requester} withdrew the request")
            }),
            SessionUpdate::Message(message) => Some(self.render_message(message)),
            SessionUpdate::ActiveChanged(Some(chat)) => Some(format!(
                "[active] now chatting with {} ({})",
                chat.requester, chat.chat_type
            )),
            // Closing is already reported by ChatClosed or the connection line.
            SessionUpdate::ActiveChanged(None) => None,
        }
    }

    fn render_message(&self, message: &ChatMessage) -> String {
        let time = local_time(message.timestamp);
        if message.is_from(&self.agent) {
            format!("{time} you -> {}: {}", message.conversation_id, message.text)
        } else {
            format!("{time} {}: {}", message.sender, message.text)
        }
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

pub fn render_requests(pending: &[ChatRequest]) -> String {
    if pending.is_empty() {
        return "No waiting requests.".to_string();
    }
    let mut out = format!("{} waiting:", pending.len());
    for request in pending {
        out.push_str(&format!(
            "\n  {:<16} {:<10} since {}",
            request.requester.as_str(),
            request.chat_type,
            local_time(request.queued_at)
        ));
    }
    out
}

pub fn render_status(agent: &str, snapshot: &SessionSnapshot) -> String {
    let active = snapshot
        .active
        .as_ref()
        .map(|chat| format!("{} ({})", chat.requester, chat.chat_type))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "agent: {agent}\nconnection: {}\nactive chat: {active}\nwaiting requests: {}",
        snapshot.connection,
        snapshot.pending.len()
    )
}

pub fn render_history(conversation: &UserId, agent: &str, messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return format!("No messages with {conversation}.");
    }
    let view = ConsoleView::new(agent, ConnectionState::Live);
    let mut out = format!("Conversation with {conversation}:");
    for message in messages {
        out.push('\n');
        out.push_str(&view.render_message(message));
    }
    out
}

async fn execute(handle: &SessionHandle, command: ConsoleCommand) -> Option<String> {
    match command {
        ConsoleCommand::Requests => Some(render_requests(&handle.snapshot().pending)),
        // Success is reported through the ActiveChanged update.
        ConsoleCommand::Pickup(user) => handle
            .pickup(user.as_str())
            .await
            .err()
            .map(|e| format!("Pickup of {user} failed: {e}")),
        ConsoleCommand::History(user) => {
            let conversation = user
                .map(UserId::from)
                .or_else(|| handle.snapshot().active.map(|chat| chat.requester));
            let Some(conversation) = conversation else {
                return Some("No active chat; use /history <user>.".to_string());
            };
            Some(match handle.transcript(conversation.clone()).await {
                Ok(messages) => render_history(&conversation, handle.agent(), &messages),
                Err(e) => format!("History unavailable: {e}"),
            })
        }
        ConsoleCommand::Status => Some(render_status(handle.agent(), &handle.snapshot())),
        ConsoleCommand::Help => Some(HELP.to_string()),
        // The sent message is echoed through the Message update.
        ConsoleCommand::Say(text) => handle
            .send_message(text)
            .await
            .err()
            .map(|e| format!("Not sent: {e}")),
        ConsoleCommand::Quit => None,
    }
}

async fn print(stdout: &mut tokio::io::Stdout, text: &str) -> std::io::Result<()> {
    stdout
        .write_all(format!("\r{text}\n{PROMPT}").as_bytes())
        .await?;
    stdout.flush().await
}

/// Runs the console until `/quit`, end of input, a shutdown signal, or the
/// session ending. Always tears the session down before returning.
pub async fn run(handle: SessionHandle) -> anyhow::Result<()> {
    let mut updates = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut view = ConsoleView::new(handle.agent(), handle.snapshot().connection);

    info!(agent = %handle.agent(), "Console started");
    print(
        &mut stdout,
        &format!("Signed in as {}. Type /help for commands.", handle.agent()),
    )
    .await?;

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                let output = match parse_line(&line) {
                    Ok(None) => None,
                    Ok(Some(ConsoleCommand::Quit)) => break Ok(()),
                    Ok(Some(command)) => execute(&handle, command).await,
                    Err(usage) => Some(usage),
                };
                let shown = match output {
                    Some(text) => print(&mut stdout, &text).await,
                    None => print(&mut stdout, "").await,
                };
                if let Err(e) = shown {
                    break Err(e.into());
                }
            }
            update = updates.recv() => match update {
                Ok(update) => {
                    if let Some(text) = view.render(&update)
                        && let Err(e) = print(&mut stdout, &text).await
                    {
                        break Err(e.into());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Console fell behind session updates");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = handle.closed() => {
                let _ = print(&mut stdout, "Session ended.").await;
                break Ok(());
            }
            _ = wait_for_shutdown() => break Ok(()),
        }
    };

    handle.shutdown().await;
    handle.closed().await;
    info!("Console stopped");
    result
}
