//! In-process stand-in for the booking REST service, used by unit tests.
//!
//! Serves the subset of `/api/v1` the session layer talks to on an ephemeral
//! local port and records what it saw: refresh calls, the refresh tokens
//! presented, and the bearer token on every protected request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;

/// What `/refresh-token` answers with.
#[derive(Debug, Clone)]
pub(crate) enum RefreshReply {
    Grant {
        access: String,
        refresh: Option<String>,
    },
    Status(u16),
    /// Never answer within any sane client timeout
    Hang,
}

impl RefreshReply {
    pub(crate) fn grant(access: &str, refresh: Option<&str>) -> Self {
        RefreshReply::Grant {
            access: access.to_string(),
            refresh: refresh.map(str::to_string),
        }
    }
}

struct MockState {
    valid_access: Mutex<Option<String>>,
    refresh_reply: Mutex<RefreshReply>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    refresh_tokens: Mutex<Vec<String>>,
    bearer_seen: Mutex<Vec<Option<String>>>,
    auth_header_counts: Mutex<Vec<usize>>,
}

pub(crate) struct MockService {
    pub(crate) base_url: String,
    state: Arc<MockState>,
}

impl MockService {
    /// Start the service. Protected routes accept `t1` until a refresh
    /// grants something else.
    pub(crate) async fn start() -> Self {
        let state = Arc::new(MockState {
            valid_access: Mutex::new(Some("t1".into())),
            refresh_reply: Mutex::new(RefreshReply::Status(401)),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            refresh_tokens: Mutex::new(Vec::new()),
            bearer_seen: Mutex::new(Vec::new()),
            auth_header_counts: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .route("/api/v1/refresh-token", post(refresh_handler))
            .route("/api/v1/profile", get(profile_handler))
            .route("/api/v1/my-bookings", get(bookings_handler))
            .route("/api/v1/create-booking", post(create_booking_handler))
            .route("/api/v1/locked", get(locked_handler))
            .route("/api/v1/broken", get(broken_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/api/v1"),
            state,
        }
    }

    pub(crate) fn set_valid_access(&self, token: Option<&str>) {
        *self.state.valid_access.lock().unwrap() = token.map(str::to_string);
    }

    pub(crate) fn set_refresh_reply(&self, reply: RefreshReply) {
        *self.state.refresh_reply.lock().unwrap() = reply;
    }

    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock().unwrap() = delay;
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens.lock().unwrap().clone()
    }

    /// Bearer tokens presented to protected routes, in arrival order.
    pub(crate) fn bearer_seen(&self) -> Vec<Option<String>> {
        self.state.bearer_seen.lock().unwrap().clone()
    }

    /// Number of times `token` was presented to protected routes.
    pub(crate) fn hits_with(&self, token: &str) -> usize {
        self.bearer_seen()
            .iter()
            .filter(|t| t.as_deref() == Some(token))
            .count()
    }

    pub(crate) fn auth_header_counts(&self) -> Vec<usize> {
        self.state.auth_header_counts.lock().unwrap().clone()
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Record the request and report whether its bearer token is accepted.
fn authorize(state: &MockState, headers: &HeaderMap) -> bool {
    let token = bearer(headers);
    let count = headers
        .get_all(axum::http::header::AUTHORIZATION)
        .iter()
        .count();
    state.auth_header_counts.lock().unwrap().push(count);
    state.bearer_seen.lock().unwrap().push(token.clone());
    let valid = state.valid_access.lock().unwrap().clone();
    token.is_some() && token == valid
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"detail": "token expired"})),
    )
        .into_response()
}

async fn refresh_handler(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = body.get("refresh").and_then(|v| v.as_str()) {
        state.refresh_tokens.lock().unwrap().push(token.to_string());
    }

    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let reply = state.refresh_reply.lock().unwrap().clone();
    match reply {
        RefreshReply::Grant { access, refresh } => {
            *state.valid_access.lock().unwrap() = Some(access.clone());
            let mut payload = serde_json::json!({ "access_token": access });
            if let Some(refresh) = refresh {
                payload["refresh_token"] = serde_json::Value::String(refresh);
            }
            Json(payload).into_response()
        }
        RefreshReply::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "refresh rejected").into_response()
        }
        RefreshReply::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(serde_json::json!({"access_token": "too-late"})).into_response()
        }
    }
}

async fn profile_handler(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !authorize(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({"user": {"username": "a", "role": "Faculty"}})).into_response()
}

async fn bookings_handler(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !authorize(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!([{"id": 1, "classroom": "B-204", "status": "Approved"}]))
        .into_response()
}

async fn create_booking_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !authorize(&state, &headers) {
        return unauthorized();
    }
    if body.get("start_time").is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"message": "start_time is required"})),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(serde_json::json!({"id": 42}))).into_response()
}

async fn locked_handler(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    authorize(&state, &headers);
    unauthorized()
}

async fn broken_handler(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    authorize(&state, &headers);
    (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response()
}
