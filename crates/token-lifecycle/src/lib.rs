//! Token lifecycle coordination
//!
//! Orchestrates the credential store, the provider token exchanger, and
//! the session signer to implement the two operations the HTTP surface
//! needs:
//!
//! 1. `link_account` — turn a one-time authorization code into a stored
//!    provider token pair plus a freshly minted session credential
//! 2. `usable_tokens` — hand back a currently valid provider token
//!    pair for a verified user, refreshing transparently when the
//!    stored pair has expired
//!
//! The coordinator is the only component that writes to the store, and
//! the only one that decides whether a failure is terminal. Refreshes
//! for the same user are serialized behind a per-user lock so racing
//! requests collapse into a single provider call.

pub mod coordinator;
pub mod error;

pub use coordinator::{Coordinator, LinkedAccount};
pub use error::{Error, Result};
