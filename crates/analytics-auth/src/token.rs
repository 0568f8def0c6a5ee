//! OAuth token exchange and refresh
//!
//! Both operations form-POST to `ClientIdentity::token_endpoint` with
//! different grant types. A rejected refresh token (401/403, or an
//! `invalid_grant` error body) maps to `Error::InvalidCredentials` so the
//! manager knows not to retry it.

use serde::{Deserialize, Serialize};

use crate::credentials::ClientIdentity;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    /// Space-separated scopes actually granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Standard OAuth2 error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange an authorization code for tokens.
///
/// `redirect_uri` must be byte-identical to the one sent in the
/// authorization request.
pub async fn exchange_code(
    client: &reqwest::Client,
    identity: &ClientIdentity,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&identity.token_endpoint)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", identity.client_id.as_str()),
            ("client_secret", identity.client_secret.expose().as_str()),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_token(
    client: &reqwest::Client,
    identity: &ClientIdentity,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&identity.token_endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", identity.client_id.as_str()),
            ("client_secret", identity.client_secret.expose().as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if is_rejected_grant(status.as_u16(), &body) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {}",
                describe_oauth_error(&body)
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Whether a failed refresh means the grant itself is revoked or invalid.
fn is_rejected_grant(status: u16, body: &str) -> bool {
    match status {
        401 | 403 => true,
        400 => serde_json::from_str::<OAuthErrorBody>(body)
            .map(|e| e.error == "invalid_grant" || e.error == "unauthorized_client")
            .unwrap_or(false),
        _ => false,
    }
}

fn describe_oauth_error(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error,
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(OAuthErrorBody { error, .. }) => error,
        Err(_) => body.to_string(),
    }
}
