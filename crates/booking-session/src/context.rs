//! Session lifecycle: startup validation, login and logout
//!
//! `SessionContext` wires the credential store, session state, refresh
//! coordinator and request pipeline together and owns the three lifecycle
//! transitions. Consumers read the session through `session()` and send
//! requests through `client()`.

use std::sync::Arc;

use booking_auth::{Credential, CredentialStore, KeyValueStore, PROFILE_PATH, UserProfile};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::error::Result;
use crate::refresh::RefreshCoordinator;
use crate::session::{SessionErrorKind, SessionState, SessionView};

#[derive(Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    user: Option<UserProfile>,
}

/// Owner of one user session.
pub struct SessionContext {
    store: CredentialStore,
    session: Arc<SessionState>,
    client: ApiClient,
}

impl SessionContext {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        medium: Arc<dyn KeyValueStore>,
    ) -> Self {
        let base_url = base_url.into();
        let store = CredentialStore::new(medium);
        let session = Arc::new(SessionState::new());
        let coordinator =
            RefreshCoordinator::new(http.clone(), base_url.clone(), session.clone(), store.clone());
        let client = ApiClient::new(http, base_url, session.clone(), coordinator);
        Self {
            store,
            session,
            client,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> SessionView {
        self.session.view()
    }

    /// Restore a persisted session and validate it against the profile endpoint.
    ///
    /// While validation runs the session is `loading` and shows the cached
    /// profile, if one was stored.
    /// The validation request goes through the normal pipeline, so an expired
    /// access token is refreshed transparently. Any other failure ends the
    /// session silently: the store is cleared, the session records why, and
    /// this still returns `Ok`. Only an unreadable store is an error.
    pub async fn bootstrap(&self) -> Result<()> {
        let persisted = self.store.load().await?;
        let Some(credential) = persisted else {
            debug!("no persisted credential, starting logged out");
            let _writes = self.session.lock_writes().await;
            self.store.clear().await?;
            self.session.clear();
            return Ok(());
        };

        let cached = match self.store.load_profile().await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "failed to read cached profile");
                None
            }
        };
        {
            let _writes = self.session.lock_writes().await;
            self.session.hydrate(credential, cached);
        }

        match self.client.get_json::<ProfileResponse>(PROFILE_PATH).await {
            Ok(ProfileResponse { user: Some(user) }) => {
                let _writes = self.session.lock_writes().await;
                if !self.session.confirm(user.clone()) {
                    debug!("session ended while validating, not restoring it");
                    return Ok(());
                }
                if let Err(e) = self.store.save_profile(&user).await {
                    warn!(error = %e, "failed to cache user profile");
                }
                info!(user = user.username().unwrap_or("unknown"), "session restored");
            }
            Ok(ProfileResponse { user: None }) => {
                warn!("profile response carried no user, ending session");
                self.end_silently(SessionErrorKind::InvalidResponse).await;
            }
            Err(e) => {
                warn!(error = %e, "session validation failed, ending session");
                self.end_silently(e.kind()).await;
            }
        }
        Ok(())
    }

    /// Establish a session from an already-obtained credential and profile.
    ///
    /// Persists first, then publishes, so the session never claims a login
    /// the store does not hold.
    pub async fn login(&self, credential: Credential, user: UserProfile) -> Result<()> {
        let _writes = self.session.lock_writes().await;
        self.store.save(&credential).await?;
        self.store.save_profile(&user).await?;
        self.session.establish(credential, user.clone());
        info!(user = user.username().unwrap_or("unknown"), "logged in");
        Ok(())
    }

    /// End the session locally. No request is sent to the service.
    pub async fn logout(&self) -> Result<()> {
        let _writes = self.session.lock_writes().await;
        self.session.clear();
        self.store.clear().await?;
        info!("logged out");
        Ok(())
    }

    async fn end_silently(&self, kind: SessionErrorKind) {
        let _writes = self.session.lock_writes().await;
        // A refresh that was denied already tore the session down.
        if self.session.credential().is_none() && self.session.view().error.is_some() {
            return;
        }
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential store");
        }
        self.session.expire(kind);
    }
}
