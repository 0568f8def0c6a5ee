//! Error types for credential lifecycle operations

use crate::lifecycle::CredentialState;

/// Errors from OAuth authentication and credential storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no available port among candidates {0:?}")]
    NoAvailablePort(Vec<u16>),

    #[error("consent denied: {0}")]
    ConsentDenied(String),

    #[error("invalid callback: {0}")]
    Callback(String),

    #[error("consent wait cancelled: {0}")]
    Cancelled(String),

    #[error("credential lifecycle is dead, reset required: {0}")]
    Terminal(String),

    /// Returned by `CredentialManager::get_valid_credential`. `state` is the
    /// state the machine was left in; `source` is the original failure.
    #[error("authentication failed (state {state}): {source}")]
    Authentication {
        state: CredentialState,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn authentication(state: CredentialState, source: Error) -> Self {
        Error::Authentication {
            state,
            source: Box::new(source),
        }
    }

    /// Whether calling `get_valid_credential` again may succeed without a
    /// `reset()`. Only a `Dead` manager needs a reset.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Authentication { state, .. } => *state != CredentialState::Dead,
            Error::Terminal(_) => false,
            _ => true,
        }
    }

    /// State the lifecycle manager was left in, for wrapped errors.
    pub fn state(&self) -> Option<CredentialState> {
        match self {
            Error::Authentication { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// The innermost error, unwrapping `Authentication`.
    pub fn root(&self) -> &Error {
        match self {
            Error::Authentication { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
