//! Common types for the Dropbox auth proxy

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
