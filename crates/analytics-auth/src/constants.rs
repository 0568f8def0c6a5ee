//! Provider OAuth defaults
//!
//! Endpoints and scopes for the Google OAuth installed-app flow used by the
//! analytics and ads reporting APIs. Every value can be overridden through
//! `ClientIdentity`; these only seed configuration defaults.

use std::time::Duration;

/// Authorization endpoint the user agent is sent to for consent.
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";

/// Token endpoint for code exchange and token refresh.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Read-only analytics reporting scope.
pub const ANALYTICS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";

/// Loopback ports registered as redirect URIs for the desktop client.
pub const DEFAULT_REDIRECT_PORTS: &[u16] = &[49152, 49153, 49154, 49155];

/// A token expiring within this window is treated as already expired.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

/// Total refresh attempts per expiry (one initial call plus one retry).
pub const REFRESH_ATTEMPTS: u32 = 2;
