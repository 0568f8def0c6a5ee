//! Credential and client identity types
//!
//! `Credential` is the record persisted by a `TokenStore` and handed to API
//! callers. `expiry` is a unix timestamp in milliseconds (absolute, not a
//! delta), computed at storage time from `TokenResponse.expires_in`.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::token::TokenResponse;

/// OAuth bearer credential for one authorized user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for API calls
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiration as unix timestamp in milliseconds
    pub expiry: u64,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    pub client_id: String,
    pub client_secret: String,
}

/// Usability of a credential at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Access token has not expired
    Valid,
    /// Access token expired, refresh token present
    Refreshable,
    /// Neither; interactive consent is required
    Dead,
}

impl Credential {
    /// Build a credential from a token endpoint response.
    ///
    /// Providers usually omit `refresh_token` on refresh responses, so the
    /// previous one is carried over. A `scope` field replaces the scope set;
    /// without it the requested scopes are recorded.
    pub fn from_token_response(
        response: TokenResponse,
        identity: &ClientIdentity,
        previous_refresh: Option<String>,
        now_millis: u64,
    ) -> Self {
        let scopes = match response.scope {
            Some(ref granted) => granted.split_whitespace().map(str::to_owned).collect(),
            None => identity.scopes.iter().cloned().collect(),
        };
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expiry: now_millis.saturating_add(response.expires_in.saturating_mul(1000)),
            scopes,
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.expose().clone(),
        }
    }

    /// Whether the access token is expired, or expires within `threshold`.
    pub fn is_expired_at(&self, now_millis: u64, threshold: Duration) -> bool {
        now_millis.saturating_add(threshold.as_millis() as u64) >= self.expiry
    }

    pub fn status_at(&self, now_millis: u64, threshold: Duration) -> CredentialStatus {
        if !self.is_expired_at(now_millis, threshold) {
            CredentialStatus::Valid
        } else if self.refresh_token.is_some() {
            CredentialStatus::Refreshable
        } else {
            CredentialStatus::Dead
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// The OAuth client this deployment authenticates as.
///
/// Immutable once built. `redirect_candidates` is tried in order when the
/// loopback listener needs a port.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub redirect_candidates: Vec<u16>,
    pub scopes: Vec<String>,
}

/// Current wall clock as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
