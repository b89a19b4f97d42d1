//! WebSocket transport for the hub, speaking the JSON hub protocol.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use proto::{HubFrame, SessionToken, TransportError, hub, split_records};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, info, warn};

use crate::transport::{HubTransport, hub_url};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `wss://` needs a process-wide rustls provider; reqwest and tungstenite
/// share the ring one.
fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Hub transport over a WebSocket.
///
/// One WebSocket message may carry several records; decoded frames are
/// queued and handed out one per [`HubTransport::recv`] call.
pub struct WebSocketTransport {
    base_url: String,
    hub_path: String,
    handshake_timeout: Duration,
    socket: Option<Socket>,
    queued: VecDeque<HubFrame>,
}

impl WebSocketTransport {
    pub fn new(
        base_url: impl Into<String>,
        hub_path: impl Into<String>,
        handshake_timeout: Duration,
    ) -> Self {
        ensure_crypto_provider();
        Self {
            base_url: base_url.into(),
            hub_path: hub_path.into(),
            handshake_timeout,
            socket: None,
            queued: VecDeque::new(),
        }
    }

    /// Decodes every record of a text message into the queue.
    fn enqueue_records(&mut self, text: &str) {
        for record in split_records(text) {
            match HubFrame::decode(record) {
                Ok(frame) => self.queued.push_back(frame),
                Err(e) => warn!(error = %e, "Dropping malformed hub record"),
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), TransportError> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| TransportError::Handshake("socket is not open".to_string()))?;

        socket
            .send(Message::Text(hub::handshake_request().into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let text = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Close(frame))) => {
                    return Err(TransportError::Closed(
                        frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
                None => return Err(TransportError::Closed(None)),
            }
        };

        let mut records = split_records(text.as_str());
        let response = records
            .next()
            .ok_or_else(|| TransportError::Handshake("empty handshake response".to_string()))?;
        if let Some(error) = hub::parse_handshake_response(response)
            .map_err(|e| TransportError::Handshake(e.to_string()))?
        {
            return Err(TransportError::Handshake(error));
        }

        // The server may piggyback frames on the handshake response.
        for record in records {
            self.enqueue_records(record);
        }
        Ok(())
    }
}

#[async_trait]
impl HubTransport for WebSocketTransport {
    async fn open(&mut self, token: &SessionToken) -> Result<(), TransportError> {
        self.close().await;

        let url = hub_url(&self.base_url, &self.hub_path, token)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        let secs = self.handshake_timeout.as_secs();
        let (socket, _response) = timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout(secs))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        self.socket = Some(socket);

        match timeout(self.handshake_timeout, self.handshake()).await {
            Ok(Ok(())) => {
                info!(host = url.host_str().unwrap_or_default(), "Hub connection open");
                Ok(())
            }
            Ok(Err(e)) => {
                self.close().await;
                Err(e)
            }
            Err(_) => {
                self.close().await;
                Err(TransportError::Timeout(secs))
            }
        }
    }

    async fn send(&mut self, frame: &HubFrame) -> Result<(), TransportError> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| TransportError::SendFailed("connection is not open".to_string()))?;
        let text = frame
            .encode()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<HubFrame, TransportError>> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Some(Ok(frame));
            }
            let socket = self.socket.as_mut()?;
            match socket.next().await {
                Some(Ok(Message::Text(text))) => self.enqueue_records(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    debug!(reason = ?reason, "Hub sent websocket close");
                    self.socket = None;
                    return Some(Err(TransportError::Closed(reason)));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.socket = None;
                    return Some(Err(TransportError::ConnectionFailed(e.to_string())));
                }
                None => {
                    self.socket = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        self.queued.clear();
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!(error = %e, "Websocket close failed");
            }
        }
    }
}
