//! Classification of non-success report API responses
//!
//! Separates authorization failures (worth one reauthentication), quota
//! exhaustion, plain rate limiting, and transient server trouble from
//! permanent request errors. The label doubles as the `error_type` metric
//! label.

/// How an upstream failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamClass {
    /// 401/403: credential rejected, reauthenticate once
    Unauthorized,
    /// 429 without quota wording
    RateLimited,
    /// 429 naming a daily or hourly property quota
    QuotaExhausted,
    /// 408 and 5xx
    Transient,
    /// Anything else, usually a malformed request
    Permanent,
}

impl UpstreamClass {
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamClass::Unauthorized => "unauthorized",
            UpstreamClass::RateLimited => "rate_limited",
            UpstreamClass::QuotaExhausted => "quota_exhausted",
            UpstreamClass::Transient => "transient",
            UpstreamClass::Permanent => "permanent",
        }
    }
}

/// Phrases in a 429 body that mean a property quota is spent, not a burst
/// limit.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "resource_exhausted",
    "tokens per day",
    "tokens per hour",
    "exhausted property tokens",
];

/// Classify a 429 response body.
pub fn classify_429(body: &str) -> UpstreamClass {
    let lower = body.to_lowercase();
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        UpstreamClass::QuotaExhausted
    } else {
        UpstreamClass::RateLimited
    }
}

/// Classify an upstream failure by HTTP status and response body.
pub fn classify_status(status: u16, body: &str) -> UpstreamClass {
    match status {
        401 | 403 => UpstreamClass::Unauthorized,
        429 => classify_429(body),
        408 | 500..=599 => UpstreamClass::Transient,
        _ => UpstreamClass::Permanent,
    }
}
