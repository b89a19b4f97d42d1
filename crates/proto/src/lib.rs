//! Shared protocol types for the agent desk.
//!
//! This crate defines the hub wire framing, push events and remote calls,
//! conversation identity types, and the strongly-typed error enums shared
//! across the workspace.

pub mod error;
pub mod event;
pub mod hub;
pub mod message;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of inbound push events and outbound hub calls.
pub use event::{DEFAULT_QUEUES, HubCall, HubEvent};
/// Re-export of hub framing helpers.
pub use hub::{HubFrame, RECORD_SEPARATOR, split_records};
/// Re-export of identity and transcript types.
pub use message::{ChatMessage, Credential, SessionToken, UserId};
