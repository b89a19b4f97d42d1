use thiserror::Error;

use crate::message::UserId;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Login endpoint rejected or could not process the credentials.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Hub transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Agent action failure.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Authentication errors. Terminal: the agent has to log in again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The login endpoint answered with a non-success status.
    #[error("Login rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// The login request never produced a response.
    #[error("Login request failed: {0}")]
    Request(String),

    /// The login endpoint answered 2xx without a usable token.
    #[error("Invalid login response: {0}")]
    InvalidResponse(String),

    /// The hub refused the `AgentLogin` call.
    #[error("Hub login refused: {0}")]
    HubLogin(String),
}

/// Hub transport errors. Recovered by the reconnect loop while a session is live.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Socket could not be opened.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol handshake was refused or malformed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A frame could not be written.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Nothing was received within the server timeout.
    #[error("Server timeout after {0}s")]
    Timeout(u64),

    /// The hub closed the connection.
    #[error("Connection closed{}", .0.as_deref().map(|e| format!(": {e}")).unwrap_or_default())]
    Closed(Option<String>),
}

/// A remote hub call that was attempted while live but did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The hub answered the invocation with an error.
    #[error("{target} failed: {message}")]
    Remote { target: String, message: String },

    /// The connection dropped before the invocation completed.
    #[error("{target} interrupted: {source}")]
    Interrupted {
        target: String,
        #[source]
        source: TransportError,
    },
}

/// Errors returned to the agent for a rejected or failed action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The hub connection is not live.
    #[error("Not connected (connection is {0})")]
    NotConnected(String),

    /// There is no active conversation to send to.
    #[error("No active chat")]
    NoActiveChat,

    /// The requester is not waiting in the pending set.
    #[error("No pending chat request from {0}")]
    UnknownRequest(UserId),

    /// Blank messages are never sent.
    #[error("Message is empty")]
    EmptyMessage,

    /// Remote call failure.
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// Transport failure while establishing the session.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Authentication failure while establishing the session.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The session dispatcher has stopped.
    #[error("Session closed")]
    Closed,
}

/// Internal proto errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Frame is not valid JSON or misses required fields.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Invocation arguments do not match the target's signature.
    #[error("Invalid arguments for {target}: {reason}")]
    InvalidArguments { target: String, reason: String },

    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
