//! Credential store for the dashboard session
//!
//! Maps a credential pair and the cached user profile onto the four keys of
//! the storage medium (`access_token`, `refresh_token`, `is_logged_in`,
//! `user`). Absence is the normal logged-out state, never an error.
//!
//! The store holds the durable copy only. In-memory session state is the
//! authoritative copy and is owned by `booking-session`.

use std::sync::Arc;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{
    ACCESS_TOKEN_KEY, IS_LOGGED_IN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, USER_KEY,
};
use crate::error::Result;
use crate::storage::KeyValueStore;

/// Bearer credential pair. Both halves redact in Debug output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Short-lived token sent as `Authorization: Bearer <access>`
    pub access: Secret<String>,
    /// Longer-lived token exchanged at `/refresh-token`
    pub refresh: Secret<String>,
}

impl Credential {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: Secret::new(refresh.into()),
        }
    }
}

/// Profile document returned by the remote profile endpoint.
///
/// Stored and handed back verbatim; only `username` is ever looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(serde_json::Value);

impl UserProfile {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Minimal profile carrying only a username (what the login exchange returns).
    pub fn from_username(username: &str) -> Self {
        Self(serde_json::json!({ "username": username }))
    }

    pub fn username(&self) -> Option<&str> {
        self.0.get("username").and_then(|u| u.as_str())
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Durable credential and profile storage over a key-value medium.
#[derive(Clone)]
pub struct CredentialStore {
    medium: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(medium: Arc<dyn KeyValueStore>) -> Self {
        Self { medium }
    }

    /// Load the persisted credential pair.
    ///
    /// Returns `None` unless both tokens are present and non-empty.
    pub async fn load(&self) -> Result<Option<Credential>> {
        let access = self.medium.get(ACCESS_TOKEN_KEY).await?;
        let refresh = self.medium.get(REFRESH_TOKEN_KEY).await?;
        match (access, refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Ok(Some(Credential::new(access, refresh)))
            }
            (Some(_), _) => {
                debug!("persisted access token without refresh token, treating as logged out");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Persist both tokens as one write.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        self.medium
            .set_many(vec![
                (ACCESS_TOKEN_KEY, credential.access.expose().clone()),
                (REFRESH_TOKEN_KEY, credential.refresh.expose().clone()),
            ])
            .await?;
        debug!("saved credential");
        Ok(())
    }

    /// Cache the user profile and mark the session as logged in.
    pub async fn save_profile(&self, user: &UserProfile) -> Result<()> {
        let encoded = serde_json::to_string(user.as_value())
            .map_err(|e| crate::Error::StorageParse(format!("serializing profile: {e}")))?;
        self.medium
            .set_many(vec![(USER_KEY, encoded), (IS_LOGGED_IN_KEY, "true".into())])
            .await
    }

    /// Cached profile, if one was saved and still parses.
    pub async fn load_profile(&self) -> Result<Option<UserProfile>> {
        let Some(raw) = self.medium.get(USER_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => Ok(Some(UserProfile::new(value))),
            Err(e) => {
                warn!(error = %e, "discarding unparseable cached profile");
                Ok(None)
            }
        }
    }

    /// Remove every session key.
    pub async fn clear(&self) -> Result<()> {
        self.medium.remove_many(SESSION_KEYS).await?;
        debug!("cleared credential store");
        Ok(())
    }
}
