//! Agent-facing handle to a running session.

use proto::{ChatMessage, SessionError, UserId};
use session::{ActiveChat, Command, ConnectionState, Reply, SessionSnapshot, SessionUpdate};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, SessionError>>;

/// Work queued for the dispatcher.
#[derive(Debug)]
pub(crate) enum Request {
    Command {
        command: Command,
        reply: ReplySender,
    },
    Transcript {
        conversation: UserId,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    Shutdown,
}

/// Cloneable handle used by front ends to drive the session.
///
/// Every call is serialized through the session dispatcher; state is only
/// ever read through snapshots.
#[derive(Clone)]
pub struct SessionHandle {
    agent: String,
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<SessionSnapshot>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    pub(crate) fn new(
        agent: String,
        requests: mpsc::Sender<Request>,
        snapshot: watch::Receiver<SessionSnapshot>,
        updates: broadcast::Sender<SessionUpdate>,
    ) -> Self {
        Self {
            agent,
            requests,
            snapshot,
            updates,
        }
    }

    /// Username of the logged-in agent.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Claims a pending chat request. Resolves once the hub acknowledged it.
    pub async fn pickup(&self, requester: impl Into<UserId>) -> Result<ActiveChat, SessionError> {
        match self.execute(Command::Pickup(requester.into())).await? {
            Reply::PickedUp(chat) => Ok(chat),
            Reply::Sent(_) => Err(SessionError::Closed),
        }
    }

    /// Sends text to the active conversation.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<ChatMessage, SessionError> {
        match self.execute(Command::Send(text.into())).await? {
            Reply::Sent(message) => Ok(message),
            Reply::PickedUp(_) => Err(SessionError::Closed),
        }
    }

    /// Runs one agent command and waits for its outcome.
    pub async fn execute(&self, command: Command) -> Result<Reply, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Command { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Copy of one conversation's transcript, in arrival order.
    pub async fn transcript(
        &self,
        conversation: impl Into<UserId>,
    ) -> Result<Vec<ChatMessage>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Transcript {
                conversation: conversation.into(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Stream of changes published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Asks the dispatcher to tear the session down.
    pub async fn shutdown(&self) {
        // A closed queue means the dispatcher is already gone.
        let _ = self.requests.send(Request::Shutdown).await;
    }

    /// Resolves once the session is disconnected for good.
    pub async fn closed(&self) {
        let mut rx = self.snapshot.clone();
        loop {
            if rx.borrow_and_update().connection == ConnectionState::Disconnected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
