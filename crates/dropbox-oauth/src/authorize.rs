//! Authorization URL construction
//!
//! The proxy uses Dropbox's no-redirect flow: the user opens the URL,
//! consents, and Dropbox displays a single-use authorization code the
//! client pastes back to the proxy. With no redirect there is no
//! callback state to round-trip; the code exchange is authenticated by
//! the app secret instead.

use crate::constants::{AUTHORIZE_ENDPOINT, TOKEN_ACCESS_TYPE};

/// Build the Dropbox authorization URL for the no-redirect flow.
///
/// `token_access_type=offline` requests a refresh token so the proxy
/// can renew access tokens without repeating user consent.
pub fn build_authorization_url(app_key: &str) -> String {
    format!(
        "{}?client_id={}&response_type=code&token_access_type={}",
        AUTHORIZE_ENDPOINT, app_key, TOKEN_ACCESS_TYPE,
    )
}
