//! PKCE (RFC 7636) and authorization URL construction
//!
//! The verifier stays in memory for the duration of one consent attempt and
//! is sent with the code exchange; the S256 challenge goes in the
//! authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::credentials::ClientIdentity;
use crate::error::{Error, Result};

/// Random 64-byte verifier, URL-safe base64 without padding (86 chars).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Opaque anti-CSRF value echoed back on the callback.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().as_simple().to_string()
}

/// Build the consent URL for `identity`.
///
/// Requests offline access with a forced consent prompt so the provider
/// issues a refresh token even for a previously authorized user.
pub fn build_authorization_url(
    identity: &ClientIdentity,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<Url> {
    let mut url = Url::parse(&identity.auth_endpoint).map_err(|e| {
        Error::Callback(format!(
            "invalid auth endpoint {}: {e}",
            identity.auth_endpoint
        ))
    })?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &identity.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &identity.scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}
