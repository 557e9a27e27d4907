//! Error types for session credential operations

/// Errors from session credential operations.
///
/// Malformed, tampered, and expired credentials all collapse into
/// `Invalid`: callers get one 401-equivalent outcome, and the concrete
/// reason is logged internally only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid session credential")]
    Invalid,

    #[error("failed to sign session credential: {0}")]
    Signing(String),
}

/// Result alias for session credential operations.
pub type Result<T> = std::result::Result<T, Error>;
