//! Authenticated API client for the sitecheck backend.
//!
//! Outbound calls behave as if authenticated sessions never expire mid-use:
//! a pre-flight expiry check refreshes predictably-stale tokens before the
//! request leaves the device, and a post-flight 401 check catches
//! server-side invalidation with exactly one refresh-and-retry. When both
//! layers fail the client tears the local session down and surfaces
//! `SessionExpired`; subscribers of [`ApiClient::session_watch`] return the
//! user to the login screen.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header::HeaderMap, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::{AuthError, TokenGrant, TokenManager};
use crate::cache::CacheManager;
use crate::models::{FormSubmission, Permit, SubmissionReceipt, UserProfile};

use super::ApiError;

/// HTTP request timeout in seconds.
/// 30s allows for slow responses over mobile links while still failing
/// fast enough for field use.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(flatten)]
    grant: TokenGrant,
    #[serde(default)]
    user: Option<UserProfile>,
}

/// API client for the sitecheck backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    cache: Option<Arc<CacheManager>>,
    session_tx: Arc<watch::Sender<bool>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenManager>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let (session_tx, _session_rx) = watch::channel(false);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            cache: None,
            session_tx: Arc::new(session_tx),
        })
    }

    /// Attach a cache so session teardown can also drop locally cached data.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Session liveness channel: `true` after login, `false` once the
    /// session is torn down. The UI layer watches this to drop back to the
    /// login screen when the session dies mid-use.
    pub fn session_watch(&self) -> watch::Receiver<bool> {
        self.session_tx.subscribe()
    }

    // ===== Auth =====

    /// Authenticate and persist the issued token pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, ApiError> {
        let url = format!("{}/api/mobile/auth/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;

        self.tokens.store_tokens(
            &login.grant.access_token,
            &login.grant.refresh_token,
            login.grant.expires_in,
            login.grant.refresh_expires_in,
        )?;

        let profile = login.user.unwrap_or_else(|| UserProfile {
            username: username.to_string(),
            ..Default::default()
        });
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.save_profile(&profile) {
                warn!(error = %err, "failed to cache user profile");
            }
        }

        let _ = self.session_tx.send(true);
        debug!(username, "login succeeded");
        Ok(profile)
    }

    /// End the session. The server-side call is best-effort; local state is
    /// cleared regardless of its outcome.
    pub async fn logout(&self) -> Result<(), ApiError> {
        match self.tokens.access_token() {
            Ok(Some(token)) => {
                let url = format!("{}/api/mobile/auth/logout", self.base_url);
                match self.http.post(&url).bearer_auth(&token).send().await {
                    Ok(response) if !response.status().is_success() => {
                        warn!(status = %response.status(), "server-side logout failed");
                    }
                    Err(err) => {
                        warn!(error = %err, "logout request failed; clearing local session anyway");
                    }
                    Ok(_) => {}
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "could not read access token; skipping server-side logout");
            }
        }
        self.teardown_session()?;
        Ok(())
    }

    fn teardown_session(&self) -> Result<(), AuthError> {
        self.tokens.clear_tokens()?;
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear() {
                warn!(error = %err, "failed to clear cached session data");
            }
        }
        let _ = self.session_tx.send(false);
        Ok(())
    }

    /// Tear the session down and produce the error call sites propagate.
    fn expire_session(&self) -> ApiError {
        if let Err(err) = self.teardown_session() {
            warn!(error = %err, "session teardown failed");
        }
        AuthError::SessionExpired.into()
    }

    // ===== Authenticated dispatch =====

    /// Send an authenticated request.
    ///
    /// Pre-flight: a token inside its expiry margin is refreshed before the
    /// request is dispatched; if that fails the request is never sent and
    /// the session is torn down. Post-flight: a 401 triggers exactly one
    /// refresh and one re-dispatch, and the second response is returned to
    /// the caller whatever its status. All other statuses pass through
    /// unmodified.
    ///
    /// Caller-supplied headers are preserved except `Authorization`, which
    /// this client owns.
    pub async fn fetch(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
    ) -> Result<Response, ApiError> {
        if self.tokens.is_access_token_expired()? {
            if !self.tokens.refresh_access_token().await? {
                return Err(self.expire_session());
            }
        }
        let Some(token) = self.tokens.access_token()? else {
            return Err(self.expire_session());
        };

        let response = self
            .dispatch(method.clone(), path, query, body, headers, &token)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Server rejected a token we considered valid: revocation, clock
        // skew, or expiry between pre-flight and dispatch.
        debug!(path, "received 401; attempting one refresh-and-retry");
        if !self.tokens.refresh_access_token().await? {
            return Err(self.expire_session());
        }
        let Some(token) = self.tokens.access_token()? else {
            return Err(self.expire_session());
        };

        // Exactly one retry, returned regardless of outcome.
        self.dispatch(method, path, query, body, headers, &token)
            .await
            .map_err(ApiError::from)
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        token: &str,
    ) -> Result<Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(headers) = headers {
            // This client owns Authorization; everything else is preserved.
            let mut headers = headers.clone();
            headers.remove(reqwest::header::AUTHORIZATION);
            request = request.headers(headers);
        }
        request = request.bearer_auth(token);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&[(&str, &str)]>,
    ) -> Result<T, ApiError> {
        let response = self.fetch(Method::GET, path, query, None, None).await?;
        Self::parse(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
        let response = self
            .fetch(Method::POST, path, None, Some(&body), None)
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    // ===== Permits =====

    /// List the user's permits, optionally filtered by a reference search.
    /// A successful fetch refreshes the offline cache.
    pub async fn list_permits(&self, search: &str) -> Result<Vec<Permit>, ApiError> {
        let query: &[(&str, &str)] = &[("search", search)];
        let permits: Vec<Permit> = self
            .get_json(
                "/api/geoprox/permits",
                if search.is_empty() { None } else { Some(query) },
            )
            .await?;

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.save_permits(&permits) {
                warn!(error = %err, "failed to cache permit list");
            }
        }
        Ok(permits)
    }

    pub async fn get_permit(&self, permit_ref: &str) -> Result<Permit, ApiError> {
        self.get_json(&format!("/api/geoprox/permits/{}", permit_ref), None)
            .await
    }

    // ===== Inspections =====

    pub async fn save_inspection(
        &self,
        permit_ref: &str,
        form_data: Value,
    ) -> Result<SubmissionReceipt, ApiError> {
        self.post_json(
            "/api/geoprox/inspections/save",
            &FormSubmission::new(permit_ref, form_data),
        )
        .await
    }

    pub async fn submit_inspection(
        &self,
        permit_ref: &str,
        form_data: Value,
    ) -> Result<SubmissionReceipt, ApiError> {
        self.post_json(
            "/api/geoprox/inspections/submit",
            &FormSubmission::new(permit_ref, form_data),
        )
        .await
    }

    // ===== Sample testing =====

    pub async fn save_sample_testing(
        &self,
        permit_ref: &str,
        form_data: Value,
    ) -> Result<SubmissionReceipt, ApiError> {
        self.post_json(
            "/api/geoprox/sample-testing/save",
            &FormSubmission::new(permit_ref, form_data),
        )
        .await
    }

    pub async fn submit_sample_testing(
        &self,
        permit_ref: &str,
        form_data: Value,
    ) -> Result<SubmissionReceipt, ApiError> {
        self.post_json(
            "/api/geoprox/sample-testing/submit",
            &FormSubmission::new(permit_ref, form_data),
        )
        .await
    }
}
