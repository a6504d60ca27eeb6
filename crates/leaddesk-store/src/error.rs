//! Store error types.
//!
//! Messages reported by the remote store are carried verbatim so callers can
//! show them next to the control that triggered the request.

/// Errors that can occur while talking to the lead store or identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be built from the supplied configuration.
    #[error("store config error: {0}")]
    Config(String),

    /// The store rejected the request and reported a reason.
    #[error("{message}")]
    Rejected {
        /// HTTP-style status code (or `0` when the backend has none).
        status: u16,
        /// Message reported by the store.
        message: String,
    },

    /// The store's access policy refused the operation.
    #[error("{0}")]
    Denied(String),

    /// The operation needs a signed-in session and there is none.
    #[error("not signed in")]
    NoSession,

    /// The request did not complete within the transport timeout.
    #[error("store request timed out")]
    Timeout,

    /// Network or transport failure.
    #[error("store network error: {0}")]
    Network(String),

    /// The store answered with a payload that could not be decoded.
    #[error("malformed store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether this error is an authorization denial.
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_) | Self::NoSession)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
