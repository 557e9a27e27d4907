//! Error types for lifecycle coordination

/// Errors from lifecycle operations.
///
/// Every failure here is terminal to the calling request; the
/// coordinator never retries on the caller's behalf. `RefreshFailed`
/// additionally guarantees the store was not mutated, so a later
/// request retries from the same stored state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No provider tokens stored for this user — expected for unknown
    /// or never-linked users, maps to 401 at the HTTP surface.
    #[error("no linked session for this user")]
    SessionNotLinked,

    /// The session credential did not verify (malformed, tampered, or
    /// expired — deliberately indistinguishable to callers).
    #[error("invalid session credential")]
    InvalidSession,

    /// Authorization-code exchange failed. Never retried: the provider
    /// treats a code as consumed on first attempt.
    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    /// Refresh exchange failed; stored tokens are untouched.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("session credential error: {0}")]
    Session(String),
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
