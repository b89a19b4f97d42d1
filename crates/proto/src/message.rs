use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hub-side identifier of a customer; doubles as the conversation id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Returns the raw user identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Agent login credentials. Held in memory for one session only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Agent username.
    pub username: String,
    /// Agent password.
    pub password: String,
}

impl Credential {
    /// Builds a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque bearer token issued by the login endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for the transport layer.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// One line of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Customer id for inbound messages, agent username for outbound ones.
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Local arrival (or send completion) time.
    pub timestamp: DateTime<Utc>,
    /// Conversation the message belongs to.
    pub conversation_id: UserId,
}

impl ChatMessage {
    /// Creates a transcript entry.
    pub fn new(
        conversation_id: UserId,
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
            conversation_id,
        }
    }

    /// Returns `true` when the agent authored this message.
    pub fn is_from(&self, username: &str) -> bool {
        self.sender == username
    }
}
