//! Token exchange and refresh against the Dropbox token endpoint
//!
//! Both grants POST form-encoded bodies to the same endpoint with
//! different `grant_type` values. Neither operation retries:
//! authorization codes are consumed on first attempt regardless of
//! whether the response arrives, and refresh retry policy belongs to
//! the lifecycle coordinator, not here.

use serde::Deserialize;
use tracing::debug;

use common::Secret;

use crate::constants::TOKEN_ENDPOINT;
use crate::error::{Error, Result};

/// Response from the token endpoint for both grants.
///
/// Dropbox also returns `expires_in`, `account_id`, and scope fields;
/// the proxy derives expiry from its own fixed TTL policy, so only the
/// token pair is decoded. Both fields are required: a refresh response
/// missing either one cannot replace the stored pair as a unit and is
/// treated as malformed.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Client for the two provider-facing token operations.
///
/// Holds the app key/secret that authenticate this proxy to Dropbox.
/// The endpoint is a field rather than a hardcoded constant so tests
/// can point the exchanger at a local mock server.
pub struct TokenExchanger {
    client: reqwest::Client,
    token_endpoint: String,
    app_key: String,
    app_secret: Secret<String>,
}

impl TokenExchanger {
    pub fn new(
        client: reqwest::Client,
        token_endpoint: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: Secret<String>,
    ) -> Self {
        Self {
            client,
            token_endpoint: token_endpoint.into(),
            app_key: app_key.into(),
            app_secret,
        }
    }

    /// Exchanger pointed at the real Dropbox token endpoint.
    pub fn for_dropbox(
        client: reqwest::Client,
        app_key: impl Into<String>,
        app_secret: Secret<String>,
    ) -> Self {
        Self::new(client, TOKEN_ENDPOINT, app_key, app_secret)
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// One-shot: the code is single-use by provider policy, so a failed
    /// exchange must surface to the caller rather than be retried.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        debug!("exchanging authorization code");
        self.grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.app_key),
            ("client_secret", self.app_secret.expose()),
        ])
        .await
    }

    /// Exchange a refresh token for a renewed token pair.
    ///
    /// Refresh tokens are long-lived and reusable; the caller may retry
    /// this at its discretion. The exchanger itself never does.
    pub async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!("refreshing access token");
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.app_key),
            ("client_secret", self.app_secret.expose()),
        ])
        .await
    }

    async fn grant(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token endpoint request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    fn test_exchanger(endpoint: &str) -> TokenExchanger {
        TokenExchanger::new(
            reqwest::Client::new(),
            endpoint,
            "test-app-key",
            Secret::new("test-app-secret".to_string()),
        )
    }

    /// Start a mock token endpoint that records the form body it
    /// receives and answers with the given status and body.
    async fn start_token_server(
        status: StatusCode,
        body: &'static str,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move |req_body: String| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().await.push(req_body);
                    (
                        status,
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                }
            });
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), seen)
    }

    #[test]
    fn token_response_ignores_extra_provider_fields() {
        let json = r#"{
            "access_token": "at_abc",
            "refresh_token": "rt_def",
            "expires_in": 14400,
            "token_type": "bearer",
            "account_id": "dbid:xyz"
        }"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.refresh_token, "rt_def");
    }

    #[test]
    fn token_response_without_refresh_token_fails_to_decode() {
        // The stored pair is replaced as a unit, so a response carrying
        // only an access token is unusable.
        let json = r#"{"access_token": "at_abc"}"#;
        assert!(serde_json::from_str::<TokenResponse>(json).is_err());
    }

    #[tokio::test]
    async fn exchange_code_sends_authorization_code_grant() {
        let (endpoint, seen) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"at_new","refresh_token":"rt_new"}"#,
        )
        .await;

        let exchanger = test_exchanger(&endpoint);
        let token = exchanger.exchange_code("the-auth-code").await.unwrap();
        assert_eq!(token.access_token, "at_new");
        assert_eq!(token.refresh_token, "rt_new");

        let bodies = seen.lock().await;
        assert_eq!(bodies.len(), 1, "exactly one request, never retried");
        let form = &bodies[0];
        assert!(form.contains("grant_type=authorization_code"), "got: {form}");
        assert!(form.contains("code=the-auth-code"));
        assert!(form.contains("client_id=test-app-key"));
        assert!(form.contains("client_secret=test-app-secret"));
    }

    #[tokio::test]
    async fn exchange_refresh_sends_refresh_token_grant() {
        let (endpoint, seen) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"at_renewed","refresh_token":"rt_renewed"}"#,
        )
        .await;

        let exchanger = test_exchanger(&endpoint);
        let token = exchanger.exchange_refresh("rt_old").await.unwrap();
        assert_eq!(token.access_token, "at_renewed");

        let bodies = seen.lock().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("grant_type=refresh_token"));
        assert!(bodies[0].contains("refresh_token=rt_old"));
    }

    #[tokio::test]
    async fn provider_rejection_maps_to_rejected_with_status() {
        let (endpoint, _seen) = start_token_server(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"code has expired"}"#,
        )
        .await;

        let exchanger = test_exchanger(&endpoint);
        let err = exchanger.exchange_code("stale-code").await.unwrap_err();
        match &err {
            Error::Rejected { status, detail } => {
                assert_eq!(*status, 400);
                assert!(detail.contains("invalid_grant"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(err.is_invalid_grant());
    }

    #[tokio::test]
    async fn undecodable_success_body_maps_to_malformed_response() {
        let (endpoint, _seen) = start_token_server(StatusCode::OK, "not json at all").await;

        let exchanger = test_exchanger(&endpoint);
        let err = exchanger.exchange_refresh("rt_x").await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_maps_to_http_error() {
        // Nothing listens on port 1
        let exchanger = test_exchanger("http://127.0.0.1:1");
        let err = exchanger.exchange_code("any").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
        assert!(!err.is_invalid_grant());
    }
}
