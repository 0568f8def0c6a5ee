//! Error types for report operations

/// Errors from fetching and normalizing a report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No valid credential could be obtained; carries the lifecycle state.
    #[error(transparent)]
    Credential(#[from] analytics_auth::Error),

    #[error("report request failed with status {status}: {body}")]
    ReportFetch { status: u16, body: String },

    /// The request never produced an HTTP status.
    #[error("report transport error: {0}")]
    Transport(String),

    #[error("cannot parse field {field}: {reason}")]
    Parse { field: String, reason: String },

    #[error("invalid report response: {0}")]
    InvalidResponse(String),
}

impl Error {
    pub(crate) fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for report operations.
pub type Result<T> = std::result::Result<T, Error>;
