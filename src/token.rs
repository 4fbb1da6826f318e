//! Session Token Decoding
//!
//! Session tokens are HS256 JWTs signed by the server. The client cannot
//! verify them (it does not hold the signing key); it only reads the payload
//! to learn who it is and when the tokens expire.
//!
//! Access token payload:
//! ```text
//! { "uid": <user id>, "usn": <username>, "vrs": { <string>: <string> }, "exp": <unix seconds> }
//! ```
//! Refresh token payload only needs `exp`.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::error::{ClientError, Result};

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub user_id: String,
    pub username: String,
    pub vars: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawAccessClaims {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    usn: String,
    #[serde(default)]
    vrs: Option<HashMap<String, String>>,
    exp: i64,
}

#[derive(Deserialize)]
struct RawRefreshClaims {
    exp: i64,
}

/// Decode the claims of an access token.
pub fn decode_access(token: &str) -> Result<AccessClaims> {
    let raw: RawAccessClaims = decode_payload(token)?;
    Ok(AccessClaims {
        user_id: raw.uid,
        username: raw.usn,
        vars: raw.vrs.unwrap_or_default(),
        expires_at: timestamp(raw.exp)?,
    })
}

/// Decode the expiry of a refresh token.
pub fn decode_refresh_expiry(token: &str) -> Result<DateTime<Utc>> {
    let raw: RawRefreshClaims = decode_payload(token)?;
    timestamp(raw.exp)
}

/// Read the payload segment without checking the signature or expiry.
fn decode_payload<T: DeserializeOwned>(token: &str) -> Result<T> {
    if token.split('.').count() != 3 {
        return Err(ClientError::MalformedCredential(
            "token must have three dot-separated segments".into(),
        ));
    }

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<T>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| ClientError::MalformedCredential(format!("Failed to decode token: {}", e)))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ClientError::MalformedCredential(format!("Invalid exp timestamp: {}", secs)))
}
