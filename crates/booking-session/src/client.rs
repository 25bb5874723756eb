//! Authenticated request pipeline
//!
//! Attaches the current bearer credential (read from session state, never
//! from the store) to every outgoing request and hands first-attempt 401s to
//! the refresh coordinator. A replayed request carries `Attempt::Replay`; a
//! second 401 on it is final.

use std::sync::Arc;

use booking_auth::{Credential, endpoint_url};
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Span, debug, instrument, warn};

use crate::error::{Error, Result};
use crate::refresh::{Outcome, RefreshCoordinator};
use crate::session::SessionState;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Whether a request is on its first attempt or is the single replay after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Replay,
}

/// A request that can be sent more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    attempt: Attempt,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            attempt: Attempt::First,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.body = Some(body);
        request
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    /// Mark this request as already retried. A 401 on it will not start a refresh.
    pub fn into_replay(mut self) -> Self {
        self.attempt = Attempt::Replay;
        self
    }
}

/// A successful (2xx) response with its body read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::InvalidResponse(format!("decoding response body: {e}")))
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Session-aware HTTP client for the booking service.
///
/// Cheap to clone; clones share session state and the refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionState>,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session: Arc<SessionState>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            session,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse> {
        self.execute(ApiRequest::post(path, body)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)
            .map_err(|e| Error::InvalidResponse(format!("encoding request body: {e}")))?;
        self.post(path, body).await?.json()
    }

    /// Send `request`, recovering once from an expired access token.
    ///
    /// Transport failures and non-401 statuses are returned untouched. A
    /// first-attempt 401 waits on the refresh coordinator; on success the
    /// request is replayed exactly once with the new credential, on failure
    /// the original 401 is returned.
    #[instrument(
        skip_all,
        fields(method = %request.method, path = %request.path, request_id = tracing::field::Empty)
    )]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        Span::current().record("request_id", request_id.as_str());

        let mut request = request;
        let (mut credential, generation) = self.session.snapshot();

        loop {
            let response = self
                .dispatch(&request, credential.as_ref(), &request_id)
                .await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return accept(response);
            }

            let rejected = Error::from_status(response.status, &response.text());
            if request.attempt == Attempt::Replay {
                warn!("replayed request rejected again, giving up");
                return Err(rejected);
            }

            let sent_with = credential.as_ref().map(|c| &c.access);
            match self.coordinator.recover(sent_with, generation).await {
                Outcome::Refreshed(fresh) => {
                    debug!("replaying request with refreshed credential");
                    credential = Some(fresh);
                    request = request.into_replay();
                }
                Outcome::Denied => return Err(rejected),
            }
        }
    }

    /// Send one attempt and read the whole body.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
        request_id: &str,
    ) -> Result<ApiResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), endpoint_url(&self.base_url, &request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        if let Some(credential) = credential {
            match bearer_value(credential) {
                Some(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                None => warn!("access token is not a valid header value, sending unauthenticated"),
            }
        }

        let response = builder.headers(headers).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Network(format!("request timed out: {e}"))
            } else {
                Error::Network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading response body: {e}")))?;
        debug!(status = status.as_u16(), attempt = ?request.attempt, "response received");

        Ok(ApiResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// `Bearer <access>` marked sensitive so it never shows up in debug output.
fn bearer_value(credential: &Credential) -> Option<HeaderValue> {
    let mut value =
        HeaderValue::from_str(&format!("Bearer {}", credential.access.expose())).ok()?;
    value.set_sensitive(true);
    Some(value)
}

fn accept(response: ApiResponse) -> Result<ApiResponse> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(Error::from_status(response.status, &response.text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockService, RefreshReply};
    use booking_auth::{CredentialStore, MemoryStore, UserProfile};
    use std::time::Duration;

    struct Fixture {
        medium: Arc<MemoryStore>,
        session: Arc<SessionState>,
        client: ApiClient,
    }

    fn fixture_with(base_url: &str, http: reqwest::Client) -> Fixture {
        let medium = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(medium.clone());
        let session = Arc::new(SessionState::new());
        let coordinator =
            RefreshCoordinator::new(http.clone(), base_url, session.clone(), store);
        let client = ApiClient::new(http, base_url, session.clone(), coordinator);
        Fixture {
            medium,
            session,
            client,
        }
    }

    fn fixture(base_url: &str) -> Fixture {
        fixture_with(base_url, reqwest::Client::new())
    }

    async fn logged_in(fx: &Fixture, access: &str, refresh: &str) {
        let credential = Credential::new(access, refresh);
        CredentialStore::new(fx.medium.clone())
            .save(&credential)
            .await
            .unwrap();
        fx.session
            .establish(credential, UserProfile::from_username("a"));
    }

    #[tokio::test]
    async fn attaches_bearer_header_exactly_once() {
        let mock = MockService::start().await;
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let bookings: serde_json::Value = fx.client.get_json("/my-bookings").await.unwrap();
        assert_eq!(bookings[0]["classroom"], "B-204");
        assert_eq!(mock.bearer_seen(), vec![Some("t1".to_string())]);
        assert_eq!(mock.auth_header_counts(), vec![1]);
        assert_eq!(mock.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn anonymous_request_has_no_authorization_header() {
        let mock = MockService::start().await;
        let fx = fixture(&mock.base_url);

        let err = fx.client.get("/my-bookings").await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired { .. }), "got: {err:?}");
        assert_eq!(mock.auth_header_counts(), vec![0]);
    }

    #[tokio::test]
    async fn expired_token_refreshes_and_replays() {
        let mock = MockService::start().await;
        mock.set_valid_access(Some("t2"));
        mock.set_refresh_reply(RefreshReply::grant("t2", None));
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let response = fx.client.get("/my-bookings").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(mock.refresh_calls(), 1);
        assert_eq!(mock.refresh_tokens_seen(), vec!["r1".to_string()]);
        assert_eq!(
            mock.bearer_seen(),
            vec![Some("t1".to_string()), Some("t2".to_string())]
        );
        let snapshot = fx.medium.snapshot().await;
        assert_eq!(snapshot["access_token"], "t2");
        assert_eq!(snapshot["refresh_token"], "r1");
        assert!(fx.session.is_logged_in());
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let mock = MockService::start().await;
        mock.set_valid_access(Some("t2"));
        mock.set_refresh_delay(Duration::from_millis(100));
        mock.set_refresh_reply(RefreshReply::grant("t2", None));
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let results =
            futures_util::future::join_all((0..5).map(|_| fx.client.get("/my-bookings"))).await;

        assert!(results.iter().all(|r| r.is_ok()), "results: {results:?}");
        assert_eq!(mock.refresh_calls(), 1);
        assert_eq!(mock.hits_with("t1"), 5);
        assert_eq!(mock.hits_with("t2"), 5, "each waiter replays exactly once");
        assert!(!fx.client.coordinator().in_flight());
    }

    #[tokio::test]
    async fn replayed_401_is_final() {
        let mock = MockService::start().await;
        mock.set_refresh_reply(RefreshReply::grant("t2", None));
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let err = fx.client.get("/locked").await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired { .. }), "got: {err:?}");
        assert_eq!(mock.refresh_calls(), 1);
        assert_eq!(
            mock.bearer_seen(),
            vec![Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn request_marked_as_replay_skips_refresh() {
        let mock = MockService::start().await;
        mock.set_refresh_reply(RefreshReply::grant("t2", None));
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let request = ApiRequest::get("/locked").into_replay();
        let err = fx.client.execute(request).await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired { .. }));
        assert_eq!(mock.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn missing_refresh_token_surfaces_401_without_exchange() {
        let mock = MockService::start().await;
        let fx = fixture(&mock.base_url);

        let err = fx.client.get("/my-bookings").await.unwrap_err();
        match err {
            Error::AuthExpired { body } => assert!(body.contains("token expired")),
            other => panic!("expected AuthExpired, got {other:?}"),
        }
        assert_eq!(mock.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn denied_refresh_rejects_waiters_with_original_error() {
        let mock = MockService::start().await;
        mock.set_valid_access(Some("t2"));
        mock.set_refresh_delay(Duration::from_millis(50));
        mock.set_refresh_reply(RefreshReply::Status(401));
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let results =
            futures_util::future::join_all((0..3).map(|_| fx.client.get("/my-bookings"))).await;

        for result in results {
            match result {
                Err(Error::AuthExpired { body }) => assert!(body.contains("token expired")),
                other => panic!("expected original 401, got {other:?}"),
            }
        }
        assert_eq!(mock.refresh_calls(), 1);
        assert!(!fx.session.is_logged_in());
        assert!(fx.medium.is_empty().await);
    }

    #[tokio::test]
    async fn refresh_network_failure_logs_out() {
        let mock = MockService::start().await;
        mock.set_refresh_reply(RefreshReply::Hang);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        let fx = fixture_with(&mock.base_url, http);
        logged_in(&fx, "t0", "r1").await;

        let err = fx.client.get("/my-bookings").await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired { .. }), "got: {err:?}");
        assert_eq!(mock.refresh_calls(), 1);

        let view = fx.session.view();
        assert!(!view.logged_in);
        assert!(view.user.is_none());
        assert!(fx.session.credential().is_none());
        assert!(fx.medium.is_empty().await);
    }

    #[tokio::test]
    async fn server_errors_bypass_the_coordinator() {
        let mock = MockService::start().await;
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let err = fx.client.get("/broken").await.unwrap_err();
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "database unavailable");
            }
            other => panic!("expected Status, got {other:?}"),
        }
        assert_eq!(mock.refresh_calls(), 0);
        assert!(fx.session.is_logged_in());
    }

    #[tokio::test]
    async fn validation_errors_pass_through() {
        let mock = MockService::start().await;
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let err = fx
            .client
            .post("/create-booking", serde_json::json!({"classroom": 3}))
            .await
            .unwrap_err();
        match err {
            Error::Validation { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("start_time is required"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(mock.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn replay_resends_the_request_body() {
        let mock = MockService::start().await;
        mock.set_valid_access(Some("t2"));
        mock.set_refresh_reply(RefreshReply::grant("t2", None));
        let fx = fixture(&mock.base_url);
        logged_in(&fx, "t1", "r1").await;

        let created: serde_json::Value = fx
            .client
            .post_json(
                "/create-booking",
                &serde_json::json!({"classroom": 3, "start_time": "2026-10-20T09:00:00Z"}),
            )
            .await
            .unwrap();
        assert_eq!(created["id"], 42);
        assert_eq!(mock.hits_with("t2"), 1);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_network_error() {
        let fx = fixture("http://127.0.0.1:9/api/v1");
        let err = fx.client.get("/my-bookings").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got: {err:?}");
    }

    #[test]
    fn request_builder_defaults_to_first_attempt() {
        let request = ApiRequest::get("/class-room-list").query("campus", "main");
        assert_eq!(request.attempt(), Attempt::First);
        assert_eq!(request.query, vec![("campus".to_string(), "main".to_string())]);
        assert_eq!(request.into_replay().attempt(), Attempt::Replay);
    }
}
