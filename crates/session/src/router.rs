use std::collections::HashMap;

use chrono::{DateTime, Utc};
use proto::{HubCall, SessionError, UserId};
use tracing::{debug, warn};

/// A customer waiting for an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// Waiting customer.
    pub requester: UserId,
    /// Queue/topic the request came in on.
    pub chat_type: String,
    /// When the request first arrived.
    pub queued_at: DateTime<Utc>,
}

/// The conversation currently claimed by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveChat {
    /// Claimed customer.
    pub requester: UserId,
    /// Queue/topic of the claimed request.
    pub chat_type: String,
    /// When the pickup was acknowledged.
    pub assigned_at: DateTime<Utc>,
}

/// What a disconnect removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Departure {
    /// The requester was waiting in the pending set.
    pub was_pending: bool,
    /// The requester was the active conversation.
    pub was_active: bool,
}

impl Departure {
    /// Returns `true` when the disconnect changed router state.
    pub fn changed(&self) -> bool {
        self.was_pending || self.was_active
    }
}

/// Pending chat requests plus the single active conversation.
///
/// A requester is never in both places at once.
#[derive(Debug, Clone, Default)]
pub struct ChatRouter {
    pending: HashMap<UserId, ChatRequest>,
    active: Option<ActiveChat>,
}

impl ChatRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a chat request.
    ///
    /// Repeated requests update the chat type and keep the original queue
    /// time. Returns `false` when the requester is already the active
    /// conversation and the request was ignored.
    pub fn on_chat_request(&mut self, requester: UserId, chat_type: String, at: DateTime<Utc>) -> bool {
        if self.is_active(&requester) {
            warn!(requester = %requester, "Chat request from active conversation ignored");
            return false;
        }
        match self.pending.get_mut(&requester) {
            Some(existing) => {
                debug!(requester = %requester, chat_type = %chat_type, "Chat request updated");
                existing.chat_type = chat_type;
            }
            None => {
                debug!(requester = %requester, chat_type = %chat_type, "Chat request queued");
                self.pending.insert(
                    requester.clone(),
                    ChatRequest {
                        requester,
                        chat_type,
                        queued_at: at,
                    },
                );
            }
        }
        true
    }

    /// Drops every trace of a departed requester.
    pub fn on_user_disconnected(&mut self, requester: &UserId) -> Departure {
        let was_pending = self.pending.remove(requester).is_some();
        let was_active = self.is_active(requester);
        if was_active {
            self.active = None;
        }
        Departure {
            was_pending,
            was_active,
        }
    }

    /// Builds the remote call for claiming `requester`. Does not change state.
    pub fn plan_pickup(&self, requester: &UserId) -> Result<HubCall, SessionError> {
        let request = self
            .pending
            .get(requester)
            .ok_or_else(|| SessionError::UnknownRequest(requester.clone()))?;
        Ok(HubCall::PickupChat {
            target: request.requester.clone(),
            chat_type: request.chat_type.clone(),
        })
    }

    /// Applies an acknowledged pickup.
    ///
    /// Moves the requester from pending to active, replacing any previous
    /// active conversation. Returns `None` and leaves state untouched when the
    /// requester is no longer pending.
    pub fn complete_pickup(
        &mut self,
        requester: &UserId,
        chat_type: &str,
        at: DateTime<Utc>,
    ) -> Option<ActiveChat> {
        self.pending.remove(requester)?;
        let active = ActiveChat {
            requester: requester.clone(),
            chat_type: chat_type.to_string(),
            assigned_at: at,
        };
        if let Some(previous) = self.active.replace(active.clone()) {
            debug!(previous = %previous.requester, next = %requester, "Active conversation replaced");
        }
        Some(active)
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Vec<&ChatRequest> {
        let mut requests: Vec<&ChatRequest> = self.pending.values().collect();
        requests.sort_by(|a, b| {
            a.queued_at
                .cmp(&b.queued_at)
                .then_with(|| a.requester.cmp(&b.requester))
        });
        requests
    }

    /// Returns `true` if `requester` waits in the pending set.
    pub fn is_pending(&self, requester: &UserId) -> bool {
        self.pending.contains_key(requester)
    }

    /// The claimed conversation, if any.
    pub fn active(&self) -> Option<&ActiveChat> {
        self.active.as_ref()
    }

    /// Returns `true` if `requester` is the claimed conversation.
    pub fn is_active(&self, requester: &UserId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| &active.requester == requester)
    }

    /// Forgets all requests and the active conversation.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.active = None;
    }
}
