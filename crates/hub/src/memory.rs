//! In-process hub transport.
//!
//! [`MemoryHub`] plays the server side: every successful
//! [`HubTransport::open`] hands it a fresh [`MemoryLink`] to script against.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use proto::{HubFrame, SessionToken, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::HubTransport;

/// Server side of the in-process transport.
pub struct MemoryHub {
    links: mpsc::UnboundedReceiver<MemoryLink>,
    online: Arc<AtomicBool>,
}

/// Client side of the in-process transport.
pub struct MemoryTransport {
    links: mpsc::UnboundedSender<MemoryLink>,
    online: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<HubFrame>>,
    inbound: Option<mpsc::UnboundedReceiver<HubFrame>>,
}

/// One accepted connection, seen from the server.
pub struct MemoryLink {
    /// Token the client presented when opening.
    pub token: String,
    from_client: mpsc::UnboundedReceiver<HubFrame>,
    to_client: mpsc::UnboundedSender<HubFrame>,
}

impl MemoryHub {
    /// Creates a connected hub/transport pair. The hub starts online.
    pub fn pair() -> (Self, MemoryTransport) {
        let (tx, rx) = mpsc::unbounded_channel();
        let online = Arc::new(AtomicBool::new(true));
        (
            Self {
                links: rx,
                online: online.clone(),
            },
            MemoryTransport {
                links: tx,
                online,
                outbound: None,
                inbound: None,
            },
        )
    }

    /// While offline every `open` fails with `ConnectionFailed`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.links.recv().await
    }
}

impl MemoryLink {
    /// Pushes a frame to the client.
    pub fn push(&self, frame: HubFrame) -> bool {
        self.to_client.send(frame).is_ok()
    }

    /// Pushes a server-to-client invocation.
    pub fn push_event(&self, target: &str, arguments: Vec<Value>) -> bool {
        self.push(HubFrame::Invocation {
            invocation_id: None,
            target: target.to_string(),
            arguments,
        })
    }

    /// Next frame from the client, skipping keep-alive pings.
    pub async fn next_frame(&mut self) -> Option<HubFrame> {
        loop {
            match self.from_client.recv().await? {
                HubFrame::Ping => continue,
                frame => return Some(frame),
            }
        }
    }

    /// Next invocation from the client as `(invocation_id, target, arguments)`.
    pub async fn next_invocation(&mut self) -> Option<(String, String, Vec<Value>)> {
        loop {
            if let HubFrame::Invocation {
                invocation_id,
                target,
                arguments,
            } = self.next_frame().await?
            {
                return Some((invocation_id.unwrap_or_default(), target, arguments));
            }
        }
    }

    /// Completes an invocation, successfully or with a remote error.
    pub fn complete(&self, invocation_id: &str, error: Option<&str>) -> bool {
        self.push(HubFrame::Completion {
            invocation_id: invocation_id.to_string(),
            result: None,
            error: error.map(str::to_string),
        })
    }

    /// Waits for the client's `AgentLogin` and acknowledges it.
    pub async fn accept_login(&mut self) -> Option<Vec<Value>> {
        let (id, target, arguments) = self.next_invocation().await?;
        if target != "AgentLogin" {
            return None;
        }
        self.complete(&id, None);
        Some(arguments)
    }
}

#[async_trait]
impl HubTransport for MemoryTransport {
    async fn open(&mut self, token: &SessionToken) -> Result<(), TransportError> {
        self.close().await;
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("hub is offline".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.links
            .send(MemoryLink {
                token: token.expose().to_string(),
                from_client,
                to_client,
            })
            .map_err(|_| TransportError::ConnectionFailed("hub is gone".to_string()))?;
        self.outbound = Some(to_server);
        self.inbound = Some(from_server);
        Ok(())
    }

    async fn send(&mut self, frame: &HubFrame) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or_else(|| TransportError::SendFailed("connection is not open".to_string()))?
            .send(frame.clone())
            .map_err(|_| TransportError::SendFailed("hub dropped the link".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<HubFrame, TransportError>> {
        let frame = self.inbound.as_mut()?.recv().await;
        if frame.is_none() {
            self.inbound = None;
        }
        frame.map(Ok)
    }

    async fn close(&mut self) {
        self.outbound = None;
        self.inbound = None;
    }
}
