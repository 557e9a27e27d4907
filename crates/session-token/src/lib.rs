//! Session credential issuing and verification
//!
//! The proxy's own credential: a signed, time-bound token embedding the
//! internal user id. Clients present it instead of ever holding
//! provider tokens. Verification is stateless — signature plus expiry
//! check against a single shared HS256 secret. No key rotation is
//! modeled.

pub mod error;
pub mod signer;

pub use error::{Error, Result};
pub use signer::SessionSigner;
