//! OAuth credential lifecycle for the analytics reporting client
//!
//! Owns a single installed-app credential: loads it from a `TokenStore`,
//! refreshes it before expiry, and falls back to an interactive PKCE consent
//! flow with a loopback redirect listener when refresh is impossible.
//! Standalone library; the reporting crate and the CLI only see
//! `CredentialManager`.
//!
//! Credential flow:
//! 1. `CredentialManager::get_valid_credential()` loads the stored credential
//! 2. Expired tokens are refreshed via `token::refresh_token()`
//! 3. Without a usable refresh token, `port::allocate()` picks a redirect port,
//!    `callback::CallbackListener` waits for the code, and
//!    `token::exchange_code()` redeems it
//! 4. Every new credential is persisted before it is returned

pub mod callback;
pub mod consent;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod pkce;
pub mod port;
pub mod store;
pub mod token;

pub use consent::ConsentPrompt;
pub use constants::*;
pub use credentials::{ClientIdentity, Credential, CredentialStatus, now_millis};
pub use error::{Error, Result};
pub use lifecycle::{CredentialState, LifecycleEvent, transition};
pub use manager::CredentialManager;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::TokenResponse;
