//! Interactive consent flow
//!
//! Allocates a redirect port, binds the loopback listener, hands the
//! authorization URL to a `ConsentPrompt`, waits for the code, and exchanges
//! it. The listener lives only as long as this future.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use tracing::{info, warn};

use crate::callback::CallbackListener;
use crate::credentials::ClientIdentity;
use crate::error::{Error, Result};
use crate::pkce::{build_authorization_url, compute_challenge, generate_state, generate_verifier};
use crate::port;
use crate::token::{self, TokenResponse};

/// Delivers the authorization URL to the user agent.
///
/// Implementations print it, open a browser, or (in tests) follow the
/// redirect themselves. Must not block waiting for the user.
pub trait ConsentPrompt: Send + Sync {
    fn present(&self, authorization_url: &Url) -> Result<()>;
}

pub(crate) async fn run_consent(
    http: &reqwest::Client,
    identity: &ClientIdentity,
    prompt: &dyn ConsentPrompt,
    timeout: Option<Duration>,
    cancel: impl Future<Output = ()>,
) -> Result<TokenResponse> {
    let port = port::allocate(&identity.redirect_candidates)?;
    let listener = CallbackListener::bind(port).await.map_err(|e| {
        warn!(port, error = %e, "allocated port was taken before the listener bound");
        Error::NoAvailablePort(vec![port])
    })?;

    let redirect_uri = listener.redirect_uri();
    let verifier = generate_verifier();
    let state = generate_state();
    let url = build_authorization_url(
        identity,
        &redirect_uri,
        &state,
        &compute_challenge(&verifier),
    )?;

    info!(port = listener.port(), "requesting user consent");
    prompt.present(&url)?;

    let code = listener.wait(&state, timeout, cancel).await?;
    token::exchange_code(http, identity, &code, &verifier, &redirect_uri).await
}
