//! HS256 session credential signer/verifier
//!
//! Issues JWTs with the user id as the `sub` claim and a fixed validity
//! window. Expiry is checked manually with zero leeway rather than via
//! jsonwebtoken's built-in validation: the built-in check applies a 60s
//! default leeway and accepts a token at its exact expiry instant,
//! while this proxy treats the boundary as expired.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::Secret;

use crate::error::{Error, Result};

/// Claims embedded in a session credential.
///
/// Timestamps are unix seconds, the JWT convention.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Internal user id
    sub: String,
    /// Issued at
    iat: u64,
    /// Expiry; the credential is invalid at and after this instant
    exp: u64,
}

/// Issues and verifies session credentials with one shared secret.
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validity: Duration,
}

impl SessionSigner {
    pub fn new(secret: &Secret<String>, validity: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.expose().as_bytes()),
            decoding: DecodingKey::from_secret(secret.expose().as_bytes()),
            validity,
        }
    }

    /// Mint a signed credential for `user_id`, valid for the configured
    /// window from now.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        let now = unix_now_secs();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.validity.as_secs(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Signing(e.to_string()))
    }

    /// Verify a credential and return the embedded user id.
    ///
    /// Any failure — undecodable token, bad signature, expired — yields
    /// `Invalid`. The distinction matters only for diagnostics and is
    /// logged at debug level; it never reaches the caller.
    pub fn verify(&self, token: &str) -> Result<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(reason = %e, "session credential rejected");
                Error::Invalid
            })?;

        if data.claims.exp <= unix_now_secs() {
            debug!(sub = %data.claims.sub, exp = data.claims.exp, "session credential expired");
            return Err(Error::Invalid);
        }

        Ok(data.claims.sub)
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
