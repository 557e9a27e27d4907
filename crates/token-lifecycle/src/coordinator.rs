//! Lifecycle coordinator
//!
//! Glues the exchanger, the store, and the signer together. All policy
//! lives here: TTL stamping, what happens on provider failure, and the
//! per-user serialization of refreshes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use credential_store::{CredentialStore, ProviderTokens};
use dropbox_oauth::TokenExchanger;
use session_token::SessionSigner;

use crate::error::{Error, Result};

/// Everything produced by a successful account link.
#[derive(Debug)]
pub struct LinkedAccount {
    pub user_id: String,
    pub session_token: String,
    pub tokens: ProviderTokens,
}

/// Coordinates token exchange, storage, and session issuance.
pub struct Coordinator {
    store: Arc<CredentialStore>,
    exchanger: TokenExchanger,
    signer: SessionSigner,
    token_ttl: Duration,
    /// Per-user advisory locks serializing refreshes. Entries are
    /// created on demand and reaped once no request holds a clone.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        exchanger: TokenExchanger,
        signer: SessionSigner,
        token_ttl: Duration,
    ) -> Self {
        Self {
            store,
            exchanger,
            signer,
            token_ttl,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Exchange a one-time authorization code and establish a new user.
    ///
    /// On success the provider token pair is stored under a freshly
    /// minted user id and a session credential is issued and cached.
    /// On failure nothing is stored: the user id is only generated
    /// after the provider accepts the code.
    pub async fn link_account(&self, auth_code: &str) -> Result<LinkedAccount> {
        let response = self.exchanger.exchange_code(auth_code).await.map_err(|e| {
            warn!(error = %e, invalid_grant = e.is_invalid_grant(), "authorization code exchange failed");
            metrics::counter!(
                "provider_token_exchanges_total",
                "grant" => "authorization_code",
                "outcome" => "failure"
            )
            .increment(1);
            Error::ExchangeFailed(e.to_string())
        })?;
        metrics::counter!(
            "provider_token_exchanges_total",
            "grant" => "authorization_code",
            "outcome" => "success"
        )
        .increment(1);

        let user_id = Uuid::new_v4().to_string();
        let tokens = ProviderTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: unix_now_millis() + self.token_ttl.as_millis() as u64,
        };

        self.store
            .put_provider_tokens(&user_id, tokens.clone())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let session_token = self
            .signer
            .issue(&user_id)
            .map_err(|e| Error::Session(e.to_string()))?;
        self.store
            .put_session(&user_id, session_token.clone())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        info!(user_id, "account linked");
        metrics::counter!("accounts_linked_total").increment(1);

        Ok(LinkedAccount {
            user_id,
            session_token,
            tokens,
        })
    }

    /// Return a currently valid provider token pair for `user_id`,
    /// refreshing transparently if the stored pair has expired.
    ///
    /// Concurrent calls for the same expired user collapse into one
    /// provider refresh: losers of the lock race re-read the store and
    /// pick up the winner's renewed pair.
    pub async fn usable_tokens(&self, user_id: &str) -> Result<ProviderTokens> {
        let tokens = self
            .store
            .get_provider_tokens(user_id)
            .await
            .ok_or(Error::SessionNotLinked)?;

        if !tokens.is_expired(unix_now_millis()) {
            // Common path: no lock, no network
            return Ok(tokens);
        }

        let lock = self.refresh_lock(user_id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have already
        // renewed the pair while we waited.
        let tokens = self
            .store
            .get_provider_tokens(user_id)
            .await
            .ok_or(Error::SessionNotLinked)?;
        let now = unix_now_millis();
        if !tokens.is_expired(now) {
            debug!(user_id, "pair already renewed by concurrent request");
            return Ok(tokens);
        }

        let response = self
            .exchanger
            .exchange_refresh(&tokens.refresh_token)
            .await
            .map_err(|e| {
                warn!(user_id, error = %e, invalid_grant = e.is_invalid_grant(), "token refresh failed");
                metrics::counter!(
                    "provider_token_exchanges_total",
                    "grant" => "refresh_token",
                    "outcome" => "failure"
                )
                .increment(1);
                Error::RefreshFailed(e.to_string())
            })?;
        metrics::counter!(
            "provider_token_exchanges_total",
            "grant" => "refresh_token",
            "outcome" => "success"
        )
        .increment(1);

        let renewed = ProviderTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: now + self.token_ttl.as_millis() as u64,
        };
        self.store
            .put_provider_tokens(user_id, renewed.clone())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        info!(user_id, "provider tokens refreshed");
        Ok(renewed)
    }

    /// Verify a session credential and return the user id it names.
    pub fn verify_session(&self, credential: &str) -> Result<String> {
        self.signer
            .verify(credential)
            .map_err(|_| Error::InvalidSession)
    }

    /// Drop all stored state for a user. Returns whether anything
    /// existed. The session credential itself keeps verifying until it
    /// expires, but without stored tokens it no longer grants access.
    pub async fn revoke(&self, user_id: &str) -> Result<bool> {
        let removed = self
            .store
            .remove(user_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        if removed {
            info!(user_id, "revoked user state");
        }
        Ok(removed)
    }

    async fn refresh_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        // Reap entries nobody holds before handing out a new clone
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use common::Secret;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    const HOUR: Duration = Duration::from_secs(3600);

    /// Mock provider token endpoint. Counts requests and answers with
    /// the given status and body after a short delay, wide enough for
    /// racing callers to pile up on the refresh lock.
    async fn start_provider(
        status: StatusCode,
        body: &'static str,
    ) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || {
                let hits = hits_clone.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    (
                        status,
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                }
            });
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), hits)
    }

    async fn test_coordinator(
        endpoint: &str,
        dir: &tempfile::TempDir,
    ) -> (Coordinator, Arc<CredentialStore>) {
        let store = Arc::new(
            CredentialStore::load(dir.path().join("credentials.json"))
                .await
                .unwrap(),
        );
        let exchanger = TokenExchanger::new(
            reqwest::Client::new(),
            endpoint,
            "test-app-key",
            Secret::new("test-app-secret".to_string()),
        );
        let signer = SessionSigner::new(&Secret::new("test-signing-secret".to_string()), HOUR);
        let coordinator = Coordinator::new(store.clone(), exchanger, signer, HOUR);
        (coordinator, store)
    }

    fn expired_tokens() -> ProviderTokens {
        ProviderTokens {
            access_token: "at_stale".into(),
            refresh_token: "rt_stale".into(),
            expires_at: 1, // long past
        }
    }

    #[tokio::test]
    async fn link_account_stores_pair_and_issues_verifiable_session() {
        let (endpoint, hits) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_new","refresh_token":"rt_new"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        let linked = coordinator.link_account("the-code").await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(linked.tokens.access_token, "at_new");
        assert_eq!(linked.tokens.refresh_token, "rt_new");
        assert!(linked.tokens.expires_at > unix_now_millis());

        // Session credential round-trips to the same user id
        let verified = coordinator.verify_session(&linked.session_token).unwrap();
        assert_eq!(verified, linked.user_id);

        // Store holds the pair and the cached session
        let stored = store.get_provider_tokens(&linked.user_id).await.unwrap();
        assert_eq!(stored.access_token, "at_new");
        assert_eq!(
            store.get_session(&linked.user_id).await.unwrap(),
            linked.session_token
        );
    }

    #[tokio::test]
    async fn failed_exchange_creates_no_state() {
        let (endpoint, _hits) = start_provider(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        let err = coordinator.link_account("stale-code").await.unwrap_err();
        assert!(matches!(err, Error::ExchangeFailed(_)), "got {err:?}");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_user_is_session_not_linked() {
        let (endpoint, hits) = start_provider(StatusCode::OK, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _store) = test_coordinator(&endpoint, &dir).await;

        let err = coordinator.usable_tokens("nobody").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotLinked));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "no provider call for unknown users");
    }

    #[tokio::test]
    async fn unexpired_pair_is_returned_without_provider_call() {
        let (endpoint, hits) = start_provider(StatusCode::OK, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store
            .put_provider_tokens(
                "u1",
                ProviderTokens {
                    access_token: "at_live".into(),
                    refresh_token: "rt_live".into(),
                    expires_at: unix_now_millis() + 60_000,
                },
            )
            .await
            .unwrap();

        let tokens = coordinator.usable_tokens("u1").await.unwrap();
        assert_eq!(tokens.access_token, "at_live");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_pair_is_refreshed_and_replaced_as_a_unit() {
        let (endpoint, hits) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_renewed","refresh_token":"rt_renewed"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();

        let tokens = coordinator.usable_tokens("u1").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(tokens.access_token, "at_renewed");
        assert_eq!(tokens.refresh_token, "rt_renewed");
        assert!(!tokens.is_expired(unix_now_millis()));

        // Persisted state matches what was returned
        let stored = store.get_provider_tokens("u1").await.unwrap();
        assert_eq!(stored.access_token, "at_renewed");
        assert_eq!(stored.refresh_token, "rt_renewed");
    }

    #[tokio::test]
    async fn failed_refresh_leaves_stored_pair_untouched() {
        let (endpoint, _hits) = start_provider(
            StatusCode::UNAUTHORIZED,
            r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();

        let err = coordinator.usable_tokens("u1").await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed(_)), "got {err:?}");

        let stored = store.get_provider_tokens("u1").await.unwrap();
        assert_eq!(stored.access_token, "at_stale");
        assert_eq!(stored.refresh_token, "rt_stale");
        assert_eq!(stored.expires_at, 1);
    }

    #[tokio::test]
    async fn malformed_refresh_response_fails_without_partial_write() {
        // A refresh response missing the refresh token cannot replace
        // the pair as a unit
        let (endpoint, _hits) =
            start_provider(StatusCode::OK, r#"{"access_token":"at_only"}"#).await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();

        let err = coordinator.usable_tokens("u1").await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed(_)), "got {err:?}");

        let stored = store.get_provider_tokens("u1").await.unwrap();
        assert_eq!(stored.access_token, "at_stale");
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_refresh() {
        let (endpoint, hits) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_renewed","refresh_token":"rt_renewed"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;
        let coordinator = Arc::new(coordinator);

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();

        let a = tokio::spawn({
            let c = coordinator.clone();
            async move { c.usable_tokens("u1").await }
        });
        let b = tokio::spawn({
            let c = coordinator.clone();
            async move { c.usable_tokens("u1").await }
        });

        let tokens_a = a.await.unwrap().unwrap();
        let tokens_b = b.await.unwrap().unwrap();

        assert_eq!(tokens_a.access_token, "at_renewed");
        assert_eq!(tokens_b.access_token, "at_renewed");
        assert_eq!(
            hits.load(Ordering::SeqCst),
            1,
            "racing refreshes must collapse into one provider call"
        );
    }

    #[tokio::test]
    async fn independent_users_refresh_independently() {
        let (endpoint, hits) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_renewed","refresh_token":"rt_renewed"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();
        store.put_provider_tokens("u2", expired_tokens()).await.unwrap();

        coordinator.usable_tokens("u1").await.unwrap();
        coordinator.usable_tokens("u2").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn revoke_drops_tokens_and_reports_whether_state_existed() {
        let (endpoint, _hits) = start_provider(StatusCode::OK, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();

        assert!(coordinator.revoke("u1").await.unwrap());
        assert!(matches!(
            coordinator.usable_tokens("u1").await,
            Err(Error::SessionNotLinked)
        ));
        assert!(!coordinator.revoke("u1").await.unwrap());
    }

    #[tokio::test]
    async fn verify_session_rejects_garbage() {
        let (endpoint, _hits) = start_provider(StatusCode::OK, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _store) = test_coordinator(&endpoint, &dir).await;

        assert!(matches!(
            coordinator.verify_session("not-a-credential"),
            Err(Error::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn refresh_locks_are_reaped_once_idle() {
        let (endpoint, _hits) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_renewed","refresh_token":"rt_renewed"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = test_coordinator(&endpoint, &dir).await;

        store.put_provider_tokens("u1", expired_tokens()).await.unwrap();
        coordinator.usable_tokens("u1").await.unwrap();

        // The next lock-map access reaps the now-idle entry for u1
        let _other = coordinator.refresh_lock("u2").await;
        let locks = coordinator.refresh_locks.lock().await;
        assert!(!locks.contains_key("u1"));
    }
}
