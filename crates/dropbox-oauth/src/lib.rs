//! Dropbox OAuth2 token operations
//!
//! Provider-facing half of the auth proxy: authorization-URL
//! construction and the two token-endpoint grants (code exchange and
//! refresh). This crate performs network calls only — it never touches
//! the credential store. Persisting exchange results is the lifecycle
//! coordinator's job.
//!
//! Grant flow:
//! 1. Client opens `authorize::build_authorization_url()` in a browser
//! 2. User consents, Dropbox displays a single-use authorization code
//! 3. Proxy calls `TokenExchanger::exchange_code()` with the code
//! 4. Later, expired access tokens are renewed via
//!    `TokenExchanger::exchange_refresh()`

pub mod authorize;
pub mod constants;
pub mod error;
pub mod token;

pub use authorize::build_authorization_url;
pub use constants::*;
pub use error::{Error, Result};
pub use token::{TokenExchanger, TokenResponse};
