//! Error types for provider token operations
//!
//! The three variants keep network failures, provider rejections, and
//! undecodable responses distinguishable for logging and metrics. The
//! lifecycle coordinator collapses all of them into a single
//! exchange-failed outcome for callers.

/// Errors from Dropbox token-endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced an HTTP response (DNS, connect, TLS).
    #[error("token endpoint unreachable: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status.
    #[error("token endpoint rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The endpoint answered 2xx but the body did not decode.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

impl Error {
    /// Whether the provider rejected the grant itself (consumed code,
    /// revoked refresh token) as opposed to failing transiently.
    /// Dropbox signals this with 400/401 from the token endpoint.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Error::Rejected { status: 400 | 401, .. })
    }
}

/// Result alias for provider token operations.
pub type Result<T> = std::result::Result<T, Error>;
