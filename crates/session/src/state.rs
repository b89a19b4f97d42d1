//! Session state and its transition function.

use chrono::{DateTime, Utc};
use proto::{ChatMessage, HubCall, HubEvent, InvokeError, SessionError, UserId};
use tracing::{debug, info, warn};

use crate::effect::{Effect, NotificationKind, Reply, SessionUpdate};
use crate::router::{ActiveChat, ChatRequest, ChatRouter};
use crate::transcript::{MessageLog, Transcript};

/// Hub connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no token.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket is open, `AgentLogin` in flight.
    Authenticating,
    /// Logged in; commands are accepted.
    Live,
    /// Connectivity lost; automatic retry `attempt` is pending.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    /// Returns `true` when outbound calls are permitted.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) => !matches!(self, Disconnected),
            (Disconnected, Connecting) => true,
            (Connecting, Authenticating) => true,
            (Authenticating, Live) => true,
            (Live, Reconnecting { attempt }) => attempt == 1,
            (Reconnecting { attempt: from }, Reconnecting { attempt: to }) => to == from + 1,
            (Reconnecting { .. }, Live) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Live => write!(f, "live"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Agent intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Claim a pending chat request.
    Pickup(UserId),
    /// Send text to the active conversation.
    Send(String),
}

/// Everything that can advance the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Connection manager changed the lifecycle state.
    Connection(ConnectionState),
    /// Push event from the hub.
    Hub(HubEvent),
    /// Agent command.
    Command(Command),
    /// A remote call issued by an earlier [`Effect::Invoke`] finished.
    Completed {
        call: HubCall,
        outcome: Result<(), InvokeError>,
    },
}

/// Read-only summary for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    /// Current lifecycle state.
    pub connection: ConnectionState,
    /// Pending requests, oldest first.
    pub pending: Vec<ChatRequest>,
    /// Claimed conversation.
    pub active: Option<ActiveChat>,
}

/// Complete client-side session: connection state, routing and transcripts.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    agent: String,
    connection: ConnectionState,
    router: ChatRouter,
    log: MessageLog,
}

impl SessionState {
    /// Fresh, disconnected state for `agent`.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            connection: ConnectionState::Disconnected,
            router: ChatRouter::new(),
            log: MessageLog::new(),
        }
    }

    /// Advances the session by one input observed at `now`.
    pub fn apply(mut self, input: Input, now: DateTime<Utc>) -> (Self, Vec<Effect>) {
        let effects = match input {
            Input::Connection(next) => self.on_connection(next),
            Input::Hub(event) => self.on_hub_event(event, now),
            Input::Command(command) => self.on_command(command),
            Input::Completed { call, outcome } => self.on_completed(call, outcome, now),
        };
        (self, effects)
    }

    fn on_connection(&mut self, next: ConnectionState) -> Vec<Effect> {
        if !self.connection.can_transition_to(next) {
            warn!(from = %self.connection, to = %next, "Illegal connection transition ignored");
            return Vec::new();
        }
        let previous = std::mem::replace(&mut self.connection, next);
        info!(from = %previous, to = %next, "Connection state changed");

        let mut effects = vec![Effect::Publish(SessionUpdate::Connection(next))];
        if next == ConnectionState::Disconnected {
            let had_active = self.router.active().is_some();
            self.router.clear();
            if had_active {
                effects.push(Effect::Publish(SessionUpdate::ActiveChanged(None)));
            }
        }
        effects
    }

    fn on_hub_event(&mut self, event: HubEvent, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            HubEvent::IncomingMessage { text, sender } => {
                let message = ChatMessage::new(sender.clone(), sender.as_str(), text, now);
                self.log.append(message.clone());
                vec![
                    Effect::Publish(SessionUpdate::Message(message)),
                    Effect::Notify(NotificationKind::Message),
                ]
            }
            HubEvent::ChatRequest { user, chat_type } => {
                if !self.router.on_chat_request(user.clone(), chat_type, now) {
                    return Vec::new();
                }
                let Some(request) = self
                    .router
                    .pending()
                    .into_iter()
                    .find(|r| r.requester == user)
                    .cloned()
                else {
                    return Vec::new();
                };
                vec![
                    Effect::Publish(SessionUpdate::ChatRequested(request)),
                    Effect::Notify(NotificationKind::ChatRequest),
                ]
            }
            HubEvent::UserDisconnected { user } => {
                let departure = self.router.on_user_disconnected(&user);
                if !departure.changed() {
                    debug!(user = %user, "Disconnect for unknown user");
                    return Vec::new();
                }
                let mut effects = vec![Effect::Publish(SessionUpdate::ChatClosed {
                    requester: user,
                    was_active: departure.was_active,
                })];
                if departure.was_active {
                    effects.push(Effect::Publish(SessionUpdate::ActiveChanged(None)));
                }
                effects
            }
        }
    }

    fn on_command(&self, command: Command) -> Vec<Effect> {
        let planned = match command {
            Command::Pickup(requester) => self.plan_pickup(&requester),
            Command::Send(text) => self.plan_send(text),
        };
        match planned {
            Ok(call) => vec![Effect::Invoke(call)],
            Err(err) => vec![Effect::Reply(Err(err))],
        }
    }

    fn plan_pickup(&self, requester: &UserId) -> Result<HubCall, SessionError> {
        self.require_live()?;
        self.router.plan_pickup(requester)
    }

    fn plan_send(&self, text: String) -> Result<HubCall, SessionError> {
        self.require_live()?;
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let active = self.router.active().ok_or(SessionError::NoActiveChat)?;
        Ok(HubCall::SendMessageToUser {
            target: active.requester.clone(),
            text,
        })
    }

    fn require_live(&self) -> Result<(), SessionError> {
        if self.connection.is_live() {
            Ok(())
        } else {
            Err(SessionError::NotConnected(self.connection.to_string()))
        }
    }

    fn on_completed(
        &mut self,
        call: HubCall,
        outcome: Result<(), InvokeError>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if let Err(err) = outcome {
            warn!(call = call.target(), error = %err, "Hub call failed");
            return vec![Effect::Reply(Err(err.into()))];
        }
        match call {
            HubCall::PickupChat { target, chat_type } => {
                match self.router.complete_pickup(&target, &chat_type, now) {
                    Some(active) => {
                        info!(requester = %target, "Chat picked up");
                        vec![
                            Effect::Publish(SessionUpdate::ActiveChanged(Some(active.clone()))),
                            Effect::Reply(Ok(Reply::PickedUp(active))),
                        ]
                    }
                    None => {
                        warn!(requester = %target, "Pickup acknowledged after requester left");
                        vec![Effect::Reply(Err(SessionError::UnknownRequest(target)))]
                    }
                }
            }
            HubCall::SendMessageToUser { target, text } => {
                let message = ChatMessage::new(target, self.agent.as_str(), text, now);
                self.log.append(message.clone());
                vec![
                    Effect::Publish(SessionUpdate::Message(message.clone())),
                    Effect::Reply(Ok(Reply::Sent(message))),
                ]
            }
            HubCall::AgentLogin { .. } => Vec::new(),
        }
    }

    /// Agent username.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Current lifecycle state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Vec<&ChatRequest> {
        self.router.pending()
    }

    /// Claimed conversation.
    pub fn active(&self) -> Option<&ActiveChat> {
        self.router.active()
    }

    /// Transcript of one conversation.
    pub fn transcript(&self, conversation: &UserId) -> Transcript<'_> {
        self.log.get(conversation)
    }

    /// All transcripts.
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Summary for observers.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            pending: self.router.pending().into_iter().cloned().collect(),
            active: self.router.active().cloned(),
        }
    }
}
