//! Dropbox OAuth endpoint constants
//!
//! The app key is public client configuration; the app secret is the
//! actual credential and lives in `common::Secret`, supplied by the
//! environment at deploy time.

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://api.dropboxapi.com/oauth2/token";

/// Authorization endpoint the user consents at (www, not api)
pub const AUTHORIZE_ENDPOINT: &str = "https://www.dropbox.com/oauth2/authorize";

/// Requested token access type. `offline` makes Dropbox issue a
/// refresh token alongside the short-lived access token.
pub const TOKEN_ACCESS_TYPE: &str = "offline";
