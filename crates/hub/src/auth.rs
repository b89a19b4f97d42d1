//! Credential exchange against the HTTP login endpoint.

use std::time::Duration;

use proto::{AuthError, Credential, SessionToken};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Exchanges agent credentials for a hub session token.
#[derive(Debug, Clone)]
pub struct AuthGate {
    http: reqwest::Client,
    login_url: String,
}

impl AuthGate {
    /// Builds a gate posting to `base_url` joined with `login_path`.
    pub fn new(base_url: &str, login_path: &str) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(LOGIN_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let login_url = reqwest::Url::parse(base_url)
            .and_then(|base| base.join(login_path))
            .map_err(|e| AuthError::Request(format!("invalid login URL: {e}")))?;
        Ok(Self::with_client(http, login_url.to_string()))
    }

    pub fn with_client(http: reqwest::Client, login_url: impl Into<String>) -> Self {
        Self {
            http,
            login_url: login_url.into(),
        }
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Posts the credential and returns the issued token.
    ///
    /// Non-2xx answers become [`AuthError::Rejected`]; a 2xx answer without
    /// a non-empty `token` field is [`AuthError::InvalidResponse`].
    pub async fn authenticate(&self, credential: &Credential) -> Result<SessionToken, AuthError> {
        debug!(username = %credential.username, url = %self.login_url, "Authenticating agent");
        let response = self
            .http
            .post(&self.login_url)
            .json(&LoginRequest {
                username: &credential.username,
                password: &credential.password,
            })
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(username = %credential.username, status = status.as_u16(), "Login rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let token = body
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("missing token".to_string()))?;

        info!(username = %credential.username, "Agent authenticated");
        Ok(SessionToken::new(token))
    }
}
