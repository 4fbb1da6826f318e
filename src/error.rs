//! Error types for nakama-realtime

use std::collections::HashMap;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// A session token does not have the shape of a JWT, or its payload
    /// could not be decoded. The session must re-authenticate.
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    /// The refresh token itself has expired. The session must re-authenticate.
    #[error("Credential exhausted: refresh token expired")]
    CredentialExhausted,

    #[error("Dial failure: {0}")]
    DialFailure(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A reply arrived for a correlation id nobody is waiting on.
    #[error("Correlation mismatch: no pending request for cid {cid:?}")]
    CorrelationMismatch { cid: String },

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Unexpected reply: expected {expected}")]
    UnexpectedReply { expected: &'static str },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ClientError {
    /// The server-reported error, if this is one.
    pub fn as_realtime(&self) -> Option<&RealtimeError> {
        match self {
            Self::Realtime(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the owning session has to authenticate again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::MalformedCredential(_) | Self::CredentialExhausted)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// An application-level error reported by the server on the realtime socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("realtime error(code={code}, message={message}, context={context:?})")]
pub struct RealtimeError {
    code: i32,
    message: String,
    context: HashMap<String, String>,
}

impl RealtimeError {
    pub fn new(code: i32, message: impl Into<String>, context: HashMap<String, String>) -> Self {
        Self {
            code,
            message: message.into(),
            context,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }
}
