//! Client-side chat session model: connection lifecycle, chat routing and
//! transcripts, advanced by a pure transition function.

pub mod effect;
pub mod router;
pub mod state;
pub mod transcript;

/// Transition side effects and the notification seam.
pub use effect::{Effect, NotificationKind, NotificationSink, NullSink, Reply, SessionUpdate};
/// Pending requests and the active conversation.
pub use router::{ActiveChat, ChatRequest, ChatRouter, Departure};
/// Session state machine.
pub use state::{Command, ConnectionState, Input, SessionSnapshot, SessionState};
/// Append-only transcripts.
pub use transcript::{MessageLog, Transcript};
