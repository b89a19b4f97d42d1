//! Side effects requested by state transitions.
//!
//! Transitions never perform I/O; they return [`Effect`]s and the dispatcher
//! that owns the connection carries them out.

use proto::{ChatMessage, HubCall, SessionError, UserId};

use crate::router::{ActiveChat, ChatRequest};
use crate::state::ConnectionState;

/// Work the dispatcher performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Issue a remote hub call.
    Invoke(HubCall),
    /// Signal the agent.
    Notify(NotificationKind),
    /// Answer the agent command that caused this transition.
    Reply(Result<Reply, SessionError>),
    /// Tell observers what changed.
    Publish(SessionUpdate),
}

/// Successful outcome of an agent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The pickup was acknowledged and the chat is now active.
    PickedUp(ActiveChat),
    /// The message was delivered to the hub and logged.
    Sent(ChatMessage),
}

/// Observable change of session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Connection moved to a new state.
    Connection(ConnectionState),
    /// A request entered (or was refreshed in) the pending set.
    ChatRequested(ChatRequest),
    /// A requester left.
    ChatClosed { requester: UserId, was_active: bool },
    /// A message was appended to a transcript.
    Message(ChatMessage),
    /// The active conversation changed.
    ActiveChanged(Option<ActiveChat>),
}

/// What the notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A customer message arrived.
    Message,
    /// A chat request arrived.
    ChatRequest,
}

impl NotificationKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ChatRequest => "chatRequest",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget notification output (sound, bell, desktop toast).
///
/// Implementations swallow their own failures.
pub trait NotificationSink: Send + Sync {
    /// Signals the agent.
    fn notify(&self, kind: NotificationKind);
}

/// Sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _kind: NotificationKind) {}
}
