//! Error types for credential store operations

/// Errors from credential store operations.
///
/// An absent record is not an error — reads return `Option` because an
/// unknown user id is a normal condition for this store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("store parse error: {0}")]
    Parse(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
