//! Token lifecycle: storage, expiry detection, and silent refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::{
    TokenStore, ACCESS_EXPIRY_KEY, ACCESS_TOKEN_KEY, REFRESH_EXPIRY_KEY, REFRESH_TOKEN_KEY,
};
use super::AuthError;

/// Early-refresh margin on the access token, in milliseconds.
/// Converts the hard expiry cliff into a soft window so a request is never
/// dispatched with a token that could expire mid-flight. The refresh token
/// gets no margin: once actually expired it cannot be renewed.
const ACCESS_EXPIRY_MARGIN_MS: i64 = 5 * 60 * 1000;

/// Timeout for the refresh exchange.
/// A hung backend must not wedge every request behind the pre-flight check.
const REFRESH_TIMEOUT_SECS: u64 = 15;

/// Token pair issued by the backend on login and refresh.
/// TTLs are in seconds; the server may rotate the refresh token on every
/// exchange, so the returned pair always supersedes the stored one.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Single authority over session validity and refresh.
///
/// Owns the token store; the credential pair is written only by
/// [`store_tokens`](Self::store_tokens) and removed only by
/// [`clear_tokens`](Self::clear_tokens). Refreshes are serialized behind a
/// mutex so concurrent expired callers piggyback on one exchange instead of
/// racing each other and losing a rotated refresh token.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    base_url: String,
    http: Client,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, base_url: impl Into<String>) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REFRESH_TIMEOUT_SECS))
            .build()
            .map_err(AuthError::from)?;

        Ok(Self {
            store,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Persist a freshly issued pair, stamping both expiries from the TTLs.
    ///
    /// All four values are written before this returns, so a subsequent
    /// expiry check reflects the new pair immediately. If any write fails
    /// the whole pair is cleared before the error propagates: readers
    /// observe the pair complete or absent, never a new token against a
    /// stale expiry.
    pub fn store_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
        refresh_expires_in_secs: i64,
    ) -> Result<(), AuthError> {
        self.store_tokens_at(
            access_token,
            refresh_token,
            expires_in_secs,
            refresh_expires_in_secs,
            Utc::now().timestamp_millis(),
        )
    }

    fn store_tokens_at(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
        refresh_expires_in_secs: i64,
        now_ms: i64,
    ) -> Result<(), AuthError> {
        let access_expiry = (now_ms + expires_in_secs * 1000).to_string();
        let refresh_expiry = (now_ms + refresh_expires_in_secs * 1000).to_string();

        let writes = [
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
            (ACCESS_EXPIRY_KEY, access_expiry.as_str()),
            (REFRESH_EXPIRY_KEY, refresh_expiry.as_str()),
        ];
        for (key, value) in writes {
            if let Err(err) = self.store.set(key, value) {
                warn!(key, "token write failed; clearing partial pair");
                let _ = self.clear_tokens();
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn access_token(&self) -> Result<Option<String>, AuthError> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, AuthError> {
        self.store.get(REFRESH_TOKEN_KEY)
    }

    /// True if no access expiry is stored, or the token is within the
    /// early-refresh margin of expiring. The boundary instant counts as
    /// expired.
    pub fn is_access_token_expired(&self) -> Result<bool, AuthError> {
        self.is_access_token_expired_at(Utc::now().timestamp_millis())
    }

    fn is_access_token_expired_at(&self, now_ms: i64) -> Result<bool, AuthError> {
        Ok(match self.expiry_ms(ACCESS_EXPIRY_KEY)? {
            Some(expiry) => now_ms >= expiry - ACCESS_EXPIRY_MARGIN_MS,
            None => true,
        })
    }

    /// True if no refresh expiry is stored, or the refresh token has
    /// actually expired.
    pub fn is_refresh_token_expired(&self) -> Result<bool, AuthError> {
        self.is_refresh_token_expired_at(Utc::now().timestamp_millis())
    }

    fn is_refresh_token_expired_at(&self, now_ms: i64) -> Result<bool, AuthError> {
        Ok(match self.expiry_ms(REFRESH_EXPIRY_KEY)? {
            Some(expiry) => now_ms >= expiry,
            None => true,
        })
    }

    /// An unparsable expiry is treated the same as a missing one.
    fn expiry_ms(&self, key: &str) -> Result<Option<i64>, AuthError> {
        Ok(self
            .store
            .get(key)?
            .and_then(|raw| raw.parse::<i64>().ok()))
    }

    /// Delete the whole credential pair. Idempotent.
    pub fn clear_tokens(&self) -> Result<(), AuthError> {
        for key in [
            ACCESS_TOKEN_KEY,
            REFRESH_TOKEN_KEY,
            ACCESS_EXPIRY_KEY,
            REFRESH_EXPIRY_KEY,
        ] {
            self.store.delete(key)?;
        }
        Ok(())
    }

    /// Exchange the stored refresh token for a new pair.
    ///
    /// Returns `Ok(true)` when a usable access token is in place afterwards
    /// and `Ok(false)` when the session could not be refreshed (no refresh
    /// token, server rejection, network or parse failure). Refresh failure
    /// is an expected condition the caller degrades to logout, so it is not
    /// an `Err`; only storage failures are. On failure the stored pair is
    /// left untouched.
    ///
    /// Refreshes are single-flight: callers that arrive while an exchange
    /// is in progress wait for it and then observe the fresh pair instead
    /// of issuing a second exchange that would lose the rotated refresh
    /// token.
    pub async fn refresh_access_token(&self) -> Result<bool, AuthError> {
        let before = self.access_token()?;
        let _guard = self.refresh_lock.lock().await;

        // A refresh that completed while we waited for the lock already
        // rotated the pair; issuing another exchange would invalidate the
        // rotated refresh token server-side. A caller whose token was
        // rejected despite looking valid (the post-flight 401 path) sees an
        // unchanged pair here and proceeds with a real exchange.
        if self.access_token()? != before && !self.is_access_token_expired()? {
            return Ok(true);
        }

        let Some(refresh_token) = self.refresh_token()? else {
            debug!("no refresh token stored; skipping refresh");
            return Ok(false);
        };

        let grant = match self.exchange(&refresh_token).await {
            Ok(grant) => grant,
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                return Ok(false);
            }
        };

        self.store_tokens(
            &grant.access_token,
            &grant.refresh_token,
            grant.expires_in,
            grant.refresh_expires_in,
        )?;
        debug!("access token refreshed");
        Ok(true)
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let url = format!("{}/api/mobile/auth/refresh", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "refresh rejected by server");
            return Err(AuthError::RefreshRejected);
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;

    fn manager_with_store() -> (Arc<MemoryTokenStore>, TokenManager) {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = TokenManager::new(store.clone(), "http://localhost:0").unwrap();
        (store, manager)
    }

    #[test]
    fn test_access_expiry_margin_boundary() {
        let (_store, manager) = manager_with_store();
        manager.store_tokens_at("a", "r", 3600, 2_592_000, 0).unwrap();

        let expiry = 3600 * 1000;
        // Exactly at expiry - margin counts as expired.
        assert!(manager
            .is_access_token_expired_at(expiry - ACCESS_EXPIRY_MARGIN_MS)
            .unwrap());
        assert!(!manager
            .is_access_token_expired_at(expiry - ACCESS_EXPIRY_MARGIN_MS - 1)
            .unwrap());
    }

    #[test]
    fn test_scenario_one_hour_access_thirty_day_refresh() {
        let (_store, manager) = manager_with_store();
        manager.store_tokens_at("a", "r", 3600, 2_592_000, 0).unwrap();

        assert!(!manager.is_access_token_expired_at(3_000_000).unwrap());
        assert!(manager.is_access_token_expired_at(3_301_000).unwrap());

        // Refresh token has no margin.
        assert!(!manager
            .is_refresh_token_expired_at(2_592_000_000 - 1)
            .unwrap());
        assert!(manager.is_refresh_token_expired_at(2_592_000_000).unwrap());
    }

    #[test]
    fn test_missing_expiry_counts_as_expired() {
        let (_store, manager) = manager_with_store();
        assert!(manager.is_access_token_expired_at(0).unwrap());
        assert!(manager.is_refresh_token_expired_at(0).unwrap());
    }

    #[test]
    fn test_garbage_expiry_counts_as_expired() {
        let (store, manager) = manager_with_store();
        store.set(ACCESS_EXPIRY_KEY, "not-a-number").unwrap();
        assert!(manager.is_access_token_expired_at(0).unwrap());
    }

    #[test]
    fn test_store_tokens_visible_immediately() {
        let (store, manager) = manager_with_store();
        manager.store_tokens_at("a1", "r1", 3600, 7200, 1_000).unwrap();

        assert_eq!(manager.access_token().unwrap().as_deref(), Some("a1"));
        assert_eq!(manager.refresh_token().unwrap().as_deref(), Some("r1"));
        assert_eq!(
            store.get(ACCESS_EXPIRY_KEY).unwrap().as_deref(),
            Some("3601000")
        );
        assert_eq!(
            store.get(REFRESH_EXPIRY_KEY).unwrap().as_deref(),
            Some("7201000")
        );
        assert!(!manager.is_access_token_expired_at(1_000).unwrap());
    }

    #[test]
    fn test_clear_tokens_is_idempotent() {
        let (store, manager) = manager_with_store();
        manager.store_tokens_at("a", "r", 3600, 7200, 0).unwrap();

        manager.clear_tokens().unwrap();
        manager.clear_tokens().unwrap();

        assert!(store.get(ACCESS_TOKEN_KEY).unwrap().is_none());
        assert!(store.get(REFRESH_TOKEN_KEY).unwrap().is_none());
        assert!(store.get(ACCESS_EXPIRY_KEY).unwrap().is_none());
        assert!(store.get(REFRESH_EXPIRY_KEY).unwrap().is_none());
    }

    /// Store that rejects writes to one key, for partial-failure tests.
    struct FlakyStore {
        inner: MemoryTokenStore,
        fail_key: &'static str,
    }

    impl TokenStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
            if key == self.fail_key {
                return Err(AuthError::Storage("write refused".to_string()));
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), AuthError> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn test_partial_write_failure_clears_pair() {
        let store = Arc::new(FlakyStore {
            inner: MemoryTokenStore::new(),
            fail_key: ACCESS_EXPIRY_KEY,
        });
        let manager = TokenManager::new(store.clone(), "http://localhost:0").unwrap();

        let result = manager.store_tokens_at("a", "r", 3600, 7200, 0);
        assert!(matches!(result, Err(AuthError::Storage(_))));

        // The first two writes succeeded before the failure; the rollback
        // must have removed them so no mixed pair is observable.
        assert!(store.get(ACCESS_TOKEN_KEY).unwrap().is_none());
        assert!(store.get(REFRESH_TOKEN_KEY).unwrap().is_none());
    }
}
