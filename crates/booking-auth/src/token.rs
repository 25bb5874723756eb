//! Unauthenticated exchanges against the booking service
//!
//! Login, refresh and register never go through the refresh-aware request
//! pipeline: a 401 from any of them is a final answer. All three use the
//! caller's `reqwest::Client`, so they inherit its timeout policy.

use common::Secret;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::constants::{LOGIN_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::credentials::{Credential, UserProfile};
use crate::error::{Error, Result, truncate_body};

/// Join the API base URL and a path that starts with `/`.
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Username/password login parameters.
#[derive(Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: Secret<String>,
    pub remember_me: bool,
}

/// Parsed login result.
#[derive(Debug)]
pub struct LoginResponse {
    pub credential: Credential,
    pub username: Option<String>,
}

impl LoginResponse {
    /// Profile to establish the session with. Falls back to the username the
    /// caller logged in with when the service omits it.
    pub fn profile(&self, fallback_username: &str) -> UserProfile {
        UserProfile::from_username(self.username.as_deref().unwrap_or(fallback_username))
    }
}

/// Parsed refresh result. `refresh` is `None` when the service did not rotate it.
#[derive(Debug)]
pub struct RefreshResponse {
    pub access: Secret<String>,
    pub refresh: Option<Secret<String>>,
}

/// Account registration parameters.
#[derive(Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: Secret<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
struct RawLogin {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct RawRefresh {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Success payloads arrive either bare or wrapped in `{"data": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

/// Exchange username and password for a credential pair.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    request: &LoginRequest,
) -> Result<LoginResponse> {
    let body = serde_json::json!({
        "username": request.username,
        "password": request.password.expose(),
        "remember_me": request.remember_me,
    });
    let response = client
        .post(endpoint_url(base_url, LOGIN_PATH))
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let response = reject_non_success(response, "login").await?;
    let raw: Envelope<RawLogin> = decode(response, "login").await?;
    let raw = raw.into_inner();

    Ok(LoginResponse {
        credential: Credential::new(raw.access_token, raw.refresh_token),
        username: raw.username,
    })
}

/// Exchange a refresh token for a new access token.
///
/// Success requires a 200 carrying a non-empty `access_token`. The refresh
/// token in the response is optional; callers keep the old one when absent.
pub async fn refresh_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
) -> Result<RefreshResponse> {
    let response = client
        .post(endpoint_url(base_url, REFRESH_PATH))
        .json(&serde_json::json!({ "refresh": refresh }))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Http(format!("token refresh timed out: {e}"))
            } else {
                Error::Http(format!("token refresh request failed: {e}"))
            }
        })?;

    let response = reject_non_success(response, "token refresh").await?;
    if response.status() != StatusCode::OK {
        return Err(Error::TokenExchange(format!(
            "token refresh returned {}",
            response.status()
        )));
    }

    let raw: Envelope<RawRefresh> = decode(response, "refresh").await?;
    let raw = raw.into_inner();
    let access = raw
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::TokenExchange("refresh response carried no access token".into()))?;

    Ok(RefreshResponse {
        access: Secret::new(access),
        refresh: raw.refresh_token.filter(|t| !t.is_empty()).map(Secret::new),
    })
}

/// Create a new account. Returns the service's response document.
pub async fn register(
    client: &reqwest::Client,
    base_url: &str,
    request: &RegisterRequest,
) -> Result<serde_json::Value> {
    let mut body = serde_json::json!({
        "username": request.username,
        "email": request.email,
        "password": request.password.expose(),
    });
    if let Some(role) = &request.role {
        body["role"] = serde_json::Value::String(role.clone());
    }

    let response = client
        .post(endpoint_url(base_url, REGISTER_PATH))
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("register request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Rejected {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    decode(response, "register").await
}

/// Map a non-2xx exchange response to an error.
///
/// 401/403 means the presented secret (password or refresh token) is
/// rejected; everything else is a failed exchange.
async fn reject_non_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .map(|body| truncate_body(&body))
        .unwrap_or_else(|_| String::from("<no body>"));

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::InvalidCredentials(format!(
            "{what} rejected ({status}): {body}"
        )));
    }

    Err(Error::TokenExchange(format!(
        "{what} returned {status}: {body}"
    )))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {what} response: {e}")))
}
