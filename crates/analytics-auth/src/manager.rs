//! Credential lifecycle manager
//!
//! `CredentialManager` owns the one credential a process authenticates with.
//! Every caller goes through `get_valid_credential`, which holds an async
//! mutex for the whole load/refresh/consent sequence: concurrent callers
//! queue behind the first and then observe its result, so at most one
//! refresh or consent is ever in flight.
//!
//! State changes go through `lifecycle::transition` and are published on a
//! watch channel so `state()` never waits on an in-flight consent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info, warn};

use crate::consent::{self, ConsentPrompt};
use crate::constants::{DEFAULT_REFRESH_THRESHOLD, REFRESH_ATTEMPTS};
use crate::credentials::{ClientIdentity, Credential, now_millis};
use crate::error::{Error, Result};
use crate::lifecycle::{CredentialState, LifecycleEvent, transition};
use crate::store::TokenStore;
use crate::token::{self, TokenResponse};

struct Inner {
    state: CredentialState,
    credential: Option<Credential>,
    /// Message of the fault that moved the machine to `Dead`
    dead_reason: Option<String>,
    published: Arc<watch::Sender<CredentialState>>,
}

impl Inner {
    fn apply(&mut self, event: LifecycleEvent) {
        let next = transition(self.state, event);
        if next != self.state {
            debug!(from = %self.state, to = %next, ?event, "credential state transition");
            metrics::counter!("credential_transitions_total", "to" => next.label()).increment(1);
            self.set(next);
        }
    }

    fn set(&mut self, state: CredentialState) {
        self.state = state;
        self.published.send_replace(state);
    }

    /// Record an unexpected failure and move to `Dead`.
    fn fault(&mut self, err: Error) -> Error {
        warn!(from = %self.state, error = %err, "credential lifecycle fault");
        self.dead_reason = Some(err.to_string());
        self.apply(LifecycleEvent::Fault);
        Error::authentication(CredentialState::Dead, err)
    }
}

/// Restores a fallback state if the owning future is dropped mid-operation.
struct Rollback<'a> {
    inner: &'a mut Inner,
    to: CredentialState,
    armed: bool,
}

impl<'a> Rollback<'a> {
    fn arm(inner: &'a mut Inner, to: CredentialState) -> Self {
        Self {
            inner,
            to,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(from = %self.inner.state, to = %self.to, "credential operation abandoned, rolling back");
            self.inner.set(self.to);
        }
    }
}

/// Serializes access to a single OAuth credential.
pub struct CredentialManager {
    identity: ClientIdentity,
    store: Arc<dyn TokenStore>,
    prompt: Arc<dyn ConsentPrompt>,
    http: reqwest::Client,
    refresh_threshold: Duration,
    consent_timeout: Option<Duration>,
    cancel: Notify,
    published: Arc<watch::Sender<CredentialState>>,
    inner: Mutex<Inner>,
}

impl CredentialManager {
    pub fn new(
        identity: ClientIdentity,
        store: Arc<dyn TokenStore>,
        prompt: Arc<dyn ConsentPrompt>,
        http: reqwest::Client,
    ) -> Self {
        let (tx, _) = watch::channel(CredentialState::Uninitialized);
        let published = Arc::new(tx);
        Self {
            identity,
            store,
            prompt,
            http,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            consent_timeout: None,
            cancel: Notify::new(),
            published: published.clone(),
            inner: Mutex::new(Inner {
                state: CredentialState::Uninitialized,
                credential: None,
                dead_reason: None,
                published,
            }),
        }
    }

    /// Give up on a consent attempt after `timeout`. Unbounded by default.
    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = Some(timeout);
        self
    }

    /// Treat tokens expiring within `threshold` as already expired.
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CredentialState {
        *self.published.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<CredentialState> {
        self.published.subscribe()
    }

    /// Return a credential whose access token is not expired.
    ///
    /// Loads from the store on first use, refreshes when expired, and falls
    /// back to interactive consent when there is no usable refresh token.
    /// Failures are `Error::Authentication` carrying the state the manager
    /// was left in: `Expired` when a later call may succeed, `Dead` when only
    /// `reset()` recovers.
    pub async fn get_valid_credential(&self) -> Result<Credential> {
        let mut inner = self.inner.lock().await;
        loop {
            let step = match inner.state {
                CredentialState::Uninitialized => self.load(&mut inner).await,
                CredentialState::Valid => Ok(self.check_expiry(&mut inner)),
                CredentialState::Expired => {
                    let refreshable = inner
                        .credential
                        .as_ref()
                        .is_some_and(|c| c.refresh_token.is_some());
                    inner.apply(if refreshable {
                        LifecycleEvent::RefreshAvailable
                    } else {
                        LifecycleEvent::NoRefreshToken
                    });
                    Ok(None)
                }
                CredentialState::Refreshing => self.refresh(&mut inner).await,
                CredentialState::AwaitingConsent => self.consent(&mut inner).await,
                CredentialState::Dead => {
                    let reason = inner
                        .dead_reason
                        .clone()
                        .unwrap_or_else(|| "no earlier failure recorded".into());
                    Err(Error::authentication(
                        CredentialState::Dead,
                        Error::Terminal(reason),
                    ))
                }
            };
            if let Some(credential) = step? {
                return Ok(credential);
            }
        }
    }

    /// Mark the current access token as rejected by the API.
    ///
    /// Only takes effect while `rejected_access_token` is still the current
    /// token, so a caller holding a stale token cannot expire a fresh one.
    pub async fn invalidate(&self, rejected_access_token: &str) {
        let mut inner = self.inner.lock().await;
        let current = inner
            .credential
            .as_ref()
            .is_some_and(|c| c.access_token == rejected_access_token);
        if inner.state == CredentialState::Valid && current {
            info!("access token rejected upstream, marking credential expired");
            inner.apply(LifecycleEvent::Invalidated);
        } else {
            debug!(state = %inner.state, "ignoring invalidation of a token that is no longer current");
        }
    }

    /// Abort an in-flight consent wait. The waiting caller gets a retryable
    /// error and the manager returns to `Expired`.
    pub fn cancel_consent(&self) {
        self.cancel.notify_waiters();
    }

    /// Discard the credential, clear the store, and return to
    /// `Uninitialized`. The only way out of `Dead`.
    pub async fn reset(&self) -> Result<()> {
        self.cancel.notify_waiters();
        let mut inner = self.inner.lock().await;
        self.store.clear().await?;
        inner.credential = None;
        inner.dead_reason = None;
        inner.apply(LifecycleEvent::Reset);
        info!("credential reset, store cleared");
        Ok(())
    }

    async fn load(&self, inner: &mut Inner) -> Result<Option<Credential>> {
        match self.store.load().await {
            Ok(credential) => {
                let fresh = !credential.is_expired_at(now_millis(), self.refresh_threshold);
                info!(fresh, "loaded stored credential");
                inner.credential = Some(credential);
                inner.apply(LifecycleEvent::Loaded { fresh });
                Ok(None)
            }
            Err(Error::NotFound(what)) => {
                info!(%what, "no stored credential, consent required");
                inner.apply(LifecycleEvent::NothingStored);
                Ok(None)
            }
            Err(e) => Err(inner.fault(e)),
        }
    }

    fn check_expiry(&self, inner: &mut Inner) -> Option<Credential> {
        let now = now_millis();
        match &inner.credential {
            Some(c) if !c.is_expired_at(now, self.refresh_threshold) => Some(c.clone()),
            _ => {
                debug!("access token expired or within refresh threshold");
                inner.apply(LifecycleEvent::ExpiryPassed);
                None
            }
        }
    }

    async fn refresh(&self, inner: &mut Inner) -> Result<Option<Credential>> {
        let Some(refresh) = inner
            .credential
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
        else {
            inner.apply(LifecycleEvent::RefreshFailed);
            return Ok(None);
        };

        let guard = Rollback::arm(inner, CredentialState::Expired);
        let outcome = self.refresh_with_retry(&refresh).await;
        guard.disarm();

        match outcome {
            Ok(response) => {
                let credential = Credential::from_token_response(
                    response,
                    &self.identity,
                    Some(refresh),
                    now_millis(),
                );
                if let Err(e) = self.store.save(&credential).await {
                    metrics::counter!("credential_refresh_total", "outcome" => "persist_failed")
                        .increment(1);
                    return Err(inner.fault(e));
                }
                metrics::counter!("credential_refresh_total", "outcome" => "success").increment(1);
                info!(expiry = credential.expiry, "access token refreshed");
                inner.credential = Some(credential.clone());
                inner.apply(LifecycleEvent::RefreshSucceeded);
                Ok(Some(credential))
            }
            Err(e) => {
                metrics::counter!("credential_refresh_total", "outcome" => "failure").increment(1);
                warn!(error = %e, "token refresh failed, falling back to consent");
                inner.apply(LifecycleEvent::RefreshFailed);
                Ok(None)
            }
        }
    }

    /// Retry once on transport or server errors. A rejected refresh token is
    /// not retried.
    async fn refresh_with_retry(&self, refresh: &str) -> Result<TokenResponse> {
        let mut attempt = 1;
        loop {
            match token::refresh_token(&self.http, &self.identity, refresh).await {
                Ok(response) => return Ok(response),
                Err(e @ Error::InvalidCredentials(_)) => return Err(e),
                Err(e) if attempt < REFRESH_ATTEMPTS => {
                    warn!(attempt, error = %e, "token refresh attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn consent(&self, inner: &mut Inner) -> Result<Option<Credential>> {
        let cancelled = self.cancel.notified();

        let guard = Rollback::arm(inner, CredentialState::Expired);
        let outcome = consent::run_consent(
            &self.http,
            &self.identity,
            self.prompt.as_ref(),
            self.consent_timeout,
            cancelled,
        )
        .await;
        guard.disarm();

        match outcome {
            Ok(response) => {
                let credential =
                    Credential::from_token_response(response, &self.identity, None, now_millis());
                if let Err(e) = self.store.save(&credential).await {
                    return Err(inner.fault(e));
                }
                info!(
                    refreshable = credential.refresh_token.is_some(),
                    "consent granted, credential stored"
                );
                inner.credential = Some(credential.clone());
                inner.apply(LifecycleEvent::ConsentGranted);
                Ok(Some(credential))
            }
            Err(e @ (Error::Cancelled(_) | Error::ConsentDenied(_) | Error::NoAvailablePort(_))) => {
                warn!(error = %e, "consent not completed");
                inner.apply(LifecycleEvent::ConsentAbandoned);
                Err(Error::authentication(inner.state, e))
            }
            Err(e) => Err(inner.fault(e)),
        }
    }
}
