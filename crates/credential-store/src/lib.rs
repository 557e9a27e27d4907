//! Persistent credential store for the Dropbox auth proxy
//!
//! Holds, per internal user id, the provider token triple
//! (access/refresh/expiry) and a cached copy of the issued session
//! credential. The store is the exclusive owner of persisted state;
//! every other component goes through its read/write contract.

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{CredentialStore, ProviderTokens};
