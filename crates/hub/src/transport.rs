//! Transport seam between the connection manager and the wire.

use async_trait::async_trait;
use proto::{HubFrame, SessionToken, TransportError};

/// Bidirectional frame transport to the hub.
///
/// `recv` must be cancel-safe: the dispatcher polls it inside `select!`.
#[async_trait]
pub trait HubTransport: Send {
    /// Opens a fresh connection and completes the protocol handshake.
    async fn open(&mut self, token: &SessionToken) -> Result<(), TransportError>;

    /// Writes one frame.
    async fn send(&mut self, frame: &HubFrame) -> Result<(), TransportError>;

    /// Next frame from the hub; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<HubFrame, TransportError>>;

    /// Closes the current connection, if any.
    async fn close(&mut self);
}

/// Builds the WebSocket URL of the hub endpoint.
///
/// `http(s)` schemes become `ws(s)` and the token is appended as
/// `access_token`, which is how browsers authenticate WebSocket upgrades.
pub fn hub_url(
    base_url: &str,
    hub_path: &str,
    token: &SessionToken,
) -> Result<reqwest::Url, TransportError> {
    let base = reqwest::Url::parse(base_url)
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid server URL '{base_url}': {e}")))?;
    let mut url = base
        .join(hub_path)
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid hub path '{hub_path}': {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::ConnectionFailed(format!("cannot use scheme '{scheme}'")))?;
    url.query_pairs_mut()
        .append_pair("access_token", token.expose());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_url_rewrites_https_to_wss_and_appends_token() {
        let url = hub_url(
            "https://10.0.0.154:5143",
            "/chatHub",
            &SessionToken::new("abc.def"),
        )
        .expect("url");
        assert_eq!(
            url.as_str(),
            "wss://10.0.0.154:5143/chatHub?access_token=abc.def"
        );
    }

    #[test]
    fn hub_url_encodes_token() {
        let url = hub_url(
            "http://localhost:5000",
            "chatHub",
            &SessionToken::new("a+b/c="),
        )
        .expect("url");
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/chatHub");
        assert_eq!(url.query(), Some("access_token=a%2Bb%2Fc%3D"));
    }

    #[test]
    fn hub_url_rejects_unknown_scheme() {
        let err = hub_url("ftp://example.com", "/chatHub", &SessionToken::new("t"))
            .expect_err("ftp is not a hub scheme");
        assert!(err.to_string().contains("unsupported scheme"));
    }
}
