//! Client entry point: authenticate and get a `Session`.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::api::{Account, AuthenticateRequest, HttpApi, UnaryApi};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::realtime::SocketEndpoint;
use crate::session::Session;

/// Options shared by every authenticate call.
#[derive(Debug, Clone, Default)]
pub struct AuthenticateOptions {
    /// Create the account if missing; `None` leaves it to the server
    pub create: Option<bool>,
    /// Username for a new account
    pub username: Option<String>,
    /// Variables embedded into the session token
    pub vars: HashMap<String, String>,
}

/// Entry point for talking to a server.
pub struct Client {
    api: Arc<dyn UnaryApi>,
    config: ClientConfig,
}

impl Client {
    /// Client over the HTTP gateway described by `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = HttpApi::new(config.http_base_url(), config.server_key.clone(), config.request_timeout())?;
        Ok(Self::with_api(Arc::new(api), config))
    }

    /// Client over any unary channel implementation.
    pub fn with_api(api: Arc<dyn UnaryApi>, config: ClientConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn socket_endpoint(&self) -> SocketEndpoint {
        self.config.socket_endpoint()
    }

    pub async fn authenticate_device(&self, id: &str, options: AuthenticateOptions) -> Result<Session> {
        self.authenticate(Account::Device { id: id.to_string() }, options).await
    }

    pub async fn authenticate_custom(&self, id: &str, options: AuthenticateOptions) -> Result<Session> {
        self.authenticate(Account::Custom { id: id.to_string() }, options).await
    }

    pub async fn authenticate_email(
        &self,
        email: &str,
        password: &str,
        options: AuthenticateOptions,
    ) -> Result<Session> {
        let account = Account::Email {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.authenticate(account, options).await
    }

    async fn authenticate(&self, account: Account, options: AuthenticateOptions) -> Result<Session> {
        let tokens = self
            .api
            .authenticate(AuthenticateRequest {
                account,
                create: options.create,
                username: options.username,
                vars: options.vars,
            })
            .await?;

        let session = Session::new(Arc::clone(&self.api), tokens)?;
        session.set_auto_refresh(self.config.auto_refresh);
        info!(
            user_id = %session.user_id(),
            created = session.created(),
            "Authenticated"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RpcResult, SessionTokens};
    use crate::error::ClientError;
    use crate::token::tests::mint;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the last authenticate request.
    #[derive(Default)]
    struct RecordingApi {
        last: Mutex<Option<AuthenticateRequest>>,
    }

    #[async_trait]
    impl UnaryApi for RecordingApi {
        async fn authenticate(&self, request: AuthenticateRequest) -> Result<SessionTokens> {
            *self.last.lock().unwrap() = Some(request);
            Ok(SessionTokens {
                created: true,
                token: mint(json!({ "uid": "u1", "usn": "new-player", "exp": 4_000_000_000i64 })),
                refresh_token: mint(json!({ "exp": 4_000_000_000i64 })),
            })
        }

        async fn session_refresh(&self, _: &str, _: &HashMap<String, String>) -> Result<SessionTokens> {
            Err(ClientError::Http("not used".into()))
        }

        async fn session_logout(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn rpc(&self, _: &str, _: &str, _: &str) -> Result<RpcResult> {
            Err(ClientError::Http("not used".into()))
        }
    }

    #[tokio::test]
    async fn test_authenticate_device() {
        let api = Arc::new(RecordingApi::default());
        let config = ClientConfig {
            auto_refresh: false,
            ..Default::default()
        };
        let client = Client::with_api(api.clone(), config);

        let session = client
            .authenticate_device(
                "device-1",
                AuthenticateOptions {
                    create: Some(true),
                    username: Some("new-player".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(session.created());
        assert_eq!(session.username(), "new-player");
        assert!(!session.auto_refresh());

        let request = api.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.account, Account::Device { id: "device-1".into() });
        assert_eq!(request.create, Some(true));
    }

    #[test]
    fn test_new_from_config() {
        let client = Client::new(ClientConfig::default()).unwrap();
        assert_eq!(client.socket_endpoint().host, "127.0.0.1:7350");
    }
}
