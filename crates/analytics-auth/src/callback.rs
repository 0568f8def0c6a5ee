//! One-shot loopback listener for the OAuth redirect
//!
//! Binds `127.0.0.1:<port>`, serves GET `/` until a request carries either a
//! `code` with the expected `state` or an `error` parameter, then stops
//! accepting. Requests with a foreign `state` are answered 400 and the wait
//! goes on. The listener socket
//! is owned by the `wait` future, so it is released on every exit path:
//! callback received, timeout, cancellation, or the future being dropped.

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// What the user agent delivered to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Denied { error: String, description: String },
}

/// Router state: the `state` value this flow issued and the one-shot sender.
struct Pending {
    expected_state: String,
    tx: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

type SharedPending = Arc<Pending>;

/// A bound, not yet serving, redirect listener.
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| Error::Io(format!("binding callback listener on port {port}: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Io(format!("reading callback listener address: {e}")))?
            .port();
        debug!(port, "callback listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI registered for this port.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Serve until the callback arrives and return the authorization code.
    ///
    /// Resolves early with `Error::Cancelled` when `timeout` elapses or
    /// `cancel` completes. An `error` parameter is `Error::ConsentDenied`.
    /// A callback whose `state` differs from `expected_state` is rejected
    /// without ending the wait.
    pub async fn wait(
        self,
        expected_state: &str,
        timeout: Option<Duration>,
        cancel: impl Future<Output = ()>,
    ) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        let router = callback_router(Arc::new(Pending {
            expected_state: expected_state.to_owned(),
            tx: Mutex::new(Some(tx)),
        }));
        let port = self.port;
        let server = axum::serve(self.listener, router).into_future();

        let deadline = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        info!(port, "waiting for OAuth callback");
        let outcome = tokio::select! {
            received = rx => received
                .map_err(|_| Error::Callback("callback channel closed unexpectedly".into()))?,
            served = server => {
                let reason = match served {
                    Ok(()) => "listener exited".to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(Error::Io(format!("callback listener on port {port} failed: {reason}")));
            }
            _ = deadline => {
                warn!(port, "no OAuth callback before timeout, releasing listener");
                return Err(Error::Cancelled(format!(
                    "no callback within {}s",
                    timeout.unwrap_or_default().as_secs()
                )));
            }
            _ = cancel => {
                info!(port, "consent wait cancelled, releasing listener");
                return Err(Error::Cancelled("consent wait cancelled by caller".into()));
            }
        };

        match outcome {
            CallbackOutcome::Code(code) => {
                info!(port, "authorization code received");
                Ok(code)
            }
            CallbackOutcome::Denied { error, description } => {
                warn!(port, error = %error, "authorization denied by user agent");
                Err(Error::ConsentDenied(if description.is_empty() {
                    error
                } else {
                    format!("{error}: {description}")
                }))
            }
        }
    }
}

fn callback_router(pending: SharedPending) -> Router {
    Router::new()
        .route("/", get(handle_callback))
        .with_state(pending)
}

async fn handle_callback(
    State(pending): State<SharedPending>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let outcome = if let Some(error) = params.get("error") {
        CallbackOutcome::Denied {
            error: error.clone(),
            description: params.get("error_description").cloned().unwrap_or_default(),
        }
    } else if let Some(code) = params.get("code") {
        if params.get("state").map(String::as_str) != Some(pending.expected_state.as_str()) {
            warn!("callback with unexpected state parameter ignored");
            return (
                StatusCode::BAD_REQUEST,
                Html("<h2>Unknown authorization request.</h2>"),
            );
        }
        CallbackOutcome::Code(code.clone())
    } else {
        return (
            StatusCode::BAD_REQUEST,
            Html("<h2>Missing authorization code.</h2>"),
        );
    };

    let denied = matches!(outcome, CallbackOutcome::Denied { .. });
    match pending.tx.lock().await.take() {
        Some(sender) => {
            let _ = sender.send(outcome);
        }
        None => {
            return (
                StatusCode::GONE,
                Html("<h2>This authorization request was already completed.</h2>"),
            );
        }
    }

    if denied {
        (
            StatusCode::OK,
            Html("<h2>Authorization was not granted.</h2><p>You can close this window.</p>"),
        )
    } else {
        (
            StatusCode::OK,
            Html("<h2>Authentication successful!</h2><p>You can close this window.</p>"),
        )
    }
}
