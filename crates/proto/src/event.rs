use serde_json::Value;

use crate::error::ProtoError;
use crate::message::UserId;

/// Queues an agent subscribes to when none are configured.
pub const DEFAULT_QUEUES: [&str; 2] = ["general", "support"];

/// Push event delivered by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A customer wrote to the agent.
    IncomingMessage { text: String, sender: UserId },
    /// A customer is waiting for an agent.
    ChatRequest { user: UserId, chat_type: String },
    /// A customer left.
    UserDisconnected { user: UserId },
}

impl HubEvent {
    /// Decodes a server-to-client invocation into a typed event.
    ///
    /// Returns `Ok(None)` for targets this client does not handle. The
    /// deployed hub spells the message target `IncommingMessage`; both
    /// spellings are accepted.
    pub fn from_invocation(target: &str, arguments: &[Value]) -> Result<Option<Self>, ProtoError> {
        let event = match target {
            "IncomingMessage" | "IncommingMessage" => {
                let [text, sender] = string_args::<2>(target, arguments)?;
                HubEvent::IncomingMessage {
                    text,
                    sender: UserId(sender),
                }
            }
            "ChatRequest" => {
                let [user, chat_type] = string_args::<2>(target, arguments)?;
                HubEvent::ChatRequest {
                    user: UserId(user),
                    chat_type,
                }
            }
            "UserDisconnected" => {
                let [user] = string_args::<1>(target, arguments)?;
                HubEvent::UserDisconnected { user: UserId(user) }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Name of the hub target this event was decoded from.
    pub fn target(&self) -> &'static str {
        match self {
            HubEvent::IncomingMessage { .. } => "IncomingMessage",
            HubEvent::ChatRequest { .. } => "ChatRequest",
            HubEvent::UserDisconnected { .. } => "UserDisconnected",
        }
    }
}

/// Client-to-hub remote call.
#[derive(Clone, PartialEq, Eq)]
pub enum HubCall {
    /// Registers the agent and subscribes it to queues.
    AgentLogin {
        username: String,
        password: String,
        queues: Vec<String>,
    },
    /// Sends text to a customer.
    SendMessageToUser { target: UserId, text: String },
    /// Claims a pending chat request.
    PickupChat { target: UserId, chat_type: String },
}

impl HubCall {
    /// Hub method name.
    pub fn target(&self) -> &'static str {
        match self {
            HubCall::AgentLogin { .. } => "AgentLogin",
            HubCall::SendMessageToUser { .. } => "SendMessageToUser",
            HubCall::PickupChat { .. } => "PickupChat",
        }
    }

    /// Positional arguments in hub method order.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            HubCall::AgentLogin {
                username,
                password,
                queues,
            } => vec![
                Value::from(username.as_str()),
                Value::from(password.as_str()),
                Value::from(queues.clone()),
            ],
            HubCall::SendMessageToUser { target, text } => {
                vec![Value::from(target.as_str()), Value::from(text.as_str())]
            }
            HubCall::PickupChat { target, chat_type } => {
                vec![Value::from(target.as_str()), Value::from(chat_type.as_str())]
            }
        }
    }
}

impl std::fmt::Debug for HubCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubCall::AgentLogin {
                username, queues, ..
            } => f
                .debug_struct("AgentLogin")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("queues", queues)
                .finish(),
            HubCall::SendMessageToUser { target, text } => f
                .debug_struct("SendMessageToUser")
                .field("target", target)
                .field("text", text)
                .finish(),
            HubCall::PickupChat { target, chat_type } => f
                .debug_struct("PickupChat")
                .field("target", target)
                .field("chat_type", chat_type)
                .finish(),
        }
    }
}

fn string_args<const N: usize>(target: &str, arguments: &[Value]) -> Result<[String; N], ProtoError> {
    if arguments.len() < N {
        return Err(ProtoError::InvalidArguments {
            target: target.to_string(),
            reason: format!("expected {N} arguments, got {}", arguments.len()),
        });
    }
    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    for (idx, slot) in out.iter_mut().enumerate() {
        *slot = arguments[idx]
            .as_str()
            .ok_or_else(|| ProtoError::InvalidArguments {
                target: target.to_string(),
                reason: format!("argument {idx} is not a string"),
            })?
            .to_string();
    }
    Ok(out)
}
