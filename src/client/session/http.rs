//! Session endpoints
//!
//! Login and refresh against the factory API. The refresh credential is an
//! HTTP-only cookie set by the login response; the client's cookie store
//! carries it on every refresh call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{RefreshedToken, SessionError, SessionRefresher};
use crate::client::config::Config;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl From<TokenResponse> for RefreshedToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            expires_in: response.expires_in.map(Duration::from_secs),
        }
    }
}

/// HTTP client for the session endpoints
#[derive(Debug, Clone)]
pub struct SessionClient {
    client: Client,
    config: Config,
}

impl SessionClient {
    pub fn new(config: Config) -> reqwest::Result<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self { client, config })
    }

    /// Login user with username and password
    pub async fn login(&self, username: &str, password: &str) -> Result<RefreshedToken, SessionError> {
        let url = self.config.api_url("/api/auth/login");
        let request = LoginRequest { username, password };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::Transient(format!("Network error: {}", e)))?;

        read_token(response, "Login").await
    }
}

#[async_trait]
impl SessionRefresher for SessionClient {
    async fn refresh(&self) -> Result<RefreshedToken, SessionError> {
        let url = self.config.api_url("/api/auth/refresh");

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| SessionError::Transient(format!("Network error: {}", e)))?;

        read_token(response, "Refresh").await
    }
}

async fn read_token(response: reqwest::Response, action: &str) -> Result<RefreshedToken, SessionError> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| status.to_string());
        return Err(classify_status(
            status,
            format!("{} failed: {} - {}", action, status, error_text),
        ));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| SessionError::Transient(format!("Failed to parse response: {}", e)))?;
    Ok(token.into())
}

/// Map a non-success status from a session endpoint
pub fn classify_status(status: StatusCode, detail: String) -> SessionError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SessionError::Transient(detail)
        }
        s if s.is_server_error() => SessionError::Transient(detail),
        _ => SessionError::Terminal(detail),
    }
}
