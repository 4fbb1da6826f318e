//! Unary API Boundary
//!
//! Stateless one-request-one-response calls against the server's REST
//! gateway. Unauthenticated calls (authenticate, refresh) carry the server
//! key as basic auth; everything else carries the session's access token as
//! a bearer.
//!
//! `Session` only talks to the `UnaryApi` trait, so tests can swap in a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Tokens returned by authenticate and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SessionTokens {
    /// Whether the account was created by this call
    pub created: bool,
    pub token: String,
    pub refresh_token: String,
}

/// Account identity presented to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    Device { id: String },
    Custom { id: String },
    Email { email: String, password: String },
}

impl Account {
    fn path_segment(&self) -> &'static str {
        match self {
            Self::Device { .. } => "device",
            Self::Custom { .. } => "custom",
            Self::Email { .. } => "email",
        }
    }
}

/// An authenticate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateRequest {
    pub account: Account,
    /// Create the account if it does not exist
    pub create: Option<bool>,
    /// Username for a newly created account
    pub username: Option<String>,
    /// Variables copied into the session token
    pub vars: HashMap<String, String>,
}

/// Result of a server function call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct RpcResult {
    pub id: String,
    pub payload: String,
}

#[async_trait]
pub trait UnaryApi: Send + Sync {
    /// Exchange account credentials for a session.
    async fn authenticate(&self, request: AuthenticateRequest) -> Result<SessionTokens>;

    /// Exchange a refresh token for a new token pair.
    async fn session_refresh(
        &self,
        refresh_token: &str,
        vars: &HashMap<String, String>,
    ) -> Result<SessionTokens>;

    /// Invalidate both tokens server-side.
    async fn session_logout(&self, bearer: &str, token: &str, refresh_token: &str) -> Result<()>;

    /// Call a server function.
    async fn rpc(&self, bearer: &str, id: &str, payload: &str) -> Result<RpcResult>;
}

#[derive(Serialize)]
struct AccountBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    vars: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    token: &'a str,
    vars: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct LogoutBody<'a> {
    token: &'a str,
    refresh_token: &'a str,
}

/// Error body produced by the gateway.
#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

/// `UnaryApi` over HTTP.
pub struct HttpApi {
    base_url: String,
    server_key: String,
    http_client: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, server_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nakama-realtime/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server_key: server_key.into(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-2xx reply to `ClientError::Api`, otherwise hand it back.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GatewayError>(&body)
            .map(|e| e.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl UnaryApi for HttpApi {
    async fn authenticate(&self, request: AuthenticateRequest) -> Result<SessionTokens> {
        let path = format!("/v2/account/authenticate/{}", request.account.path_segment());
        debug!(path = %path, "Authenticating");

        let body = match &request.account {
            Account::Device { id } | Account::Custom { id } => AccountBody {
                id: Some(id.as_str()),
                email: None,
                password: None,
                vars: &request.vars,
            },
            Account::Email { email, password } => AccountBody {
                id: None,
                email: Some(email.as_str()),
                password: Some(password.as_str()),
                vars: &request.vars,
            },
        };

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(create) = request.create {
            query.push(("create", create.to_string()));
        }
        if let Some(username) = &request.username {
            query.push(("username", username.clone()));
        }

        let response = self
            .http_client
            .post(self.url(&path))
            .basic_auth(&self.server_key, Some(""))
            .query(&query)
            .json(&body)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn session_refresh(
        &self,
        refresh_token: &str,
        vars: &HashMap<String, String>,
    ) -> Result<SessionTokens> {
        debug!("Refreshing session");
        let response = self
            .http_client
            .post(self.url("/v2/account/session/refresh"))
            .basic_auth(&self.server_key, Some(""))
            .json(&RefreshBody {
                token: refresh_token,
                vars,
            })
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn session_logout(&self, bearer: &str, token: &str, refresh_token: &str) -> Result<()> {
        let response = self
            .http_client
            .post(self.url("/v2/session/logout"))
            .bearer_auth(bearer)
            .json(&LogoutBody {
                token,
                refresh_token,
            })
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn rpc(&self, bearer: &str, id: &str, payload: &str) -> Result<RpcResult> {
        debug!(id = %id, "Calling rpc");
        // The gateway expects the payload as a JSON string literal
        let response = self
            .http_client
            .post(self.url(&format!("/v2/rpc/{}", id)))
            .bearer_auth(bearer)
            .json(&payload)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }
}
