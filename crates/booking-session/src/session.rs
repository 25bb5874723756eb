//! In-memory session state
//!
//! `SessionState` is the authoritative copy of the credential and profile.
//! The request pipeline only reads it; `SessionContext` and the refresh
//! coordinator are the only writers, and they hold the write gate while
//! they touch both this state and the credential store.
//!
//! Reads take a std `RwLock` briefly and never span an await, so attaching a
//! credential to a request never blocks on a refresh in progress.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use booking_auth::{Credential, UserProfile};
use common::Secret;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

/// Why the session was last torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// The service rejected the access token and no recovery was possible
    AuthExpired,
    /// The refresh exchange failed or no refresh token was available
    RefreshDenied,
    /// The service could not be reached
    Network,
    /// The service answered with something unusable
    InvalidResponse,
    /// The credential store could not be read or written
    Storage,
}

impl SessionErrorKind {
    /// Label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionErrorKind::AuthExpired => "auth_expired",
            SessionErrorKind::RefreshDenied => "refresh_denied",
            SessionErrorKind::Network => "network",
            SessionErrorKind::InvalidResponse => "invalid_response",
            SessionErrorKind::Storage => "storage",
        }
    }
}

/// Full session record.
///
/// Invariant: `logged_in` implies `credential` and `user` are both present.
#[derive(Debug, Clone, Default)]
struct Session {
    logged_in: bool,
    user: Option<UserProfile>,
    credential: Option<Credential>,
    loading: bool,
    error: Option<SessionErrorKind>,
    /// Bumped whenever the credential is replaced by something other than a
    /// refresh of the same login.
    generation: u64,
}

impl Session {
    fn check_invariant(&self) {
        debug_assert!(
            !self.logged_in || (self.credential.is_some() && self.user.is_some()),
            "logged-in session without credential or user"
        );
    }
}

/// Read-only projection handed to consumers. Carries no credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub logged_in: bool,
    pub user: Option<UserProfile>,
    pub loading: bool,
    pub error: Option<SessionErrorKind>,
}

/// Process-wide session owner, shared via `Arc` by the context, the
/// coordinator and the request pipeline.
#[derive(Default)]
pub struct SessionState {
    inner: RwLock<Session>,
    writes: Mutex<()>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current credential, if any. This is what the pipeline attaches.
    pub fn credential(&self) -> Option<Credential> {
        self.read().credential.clone()
    }

    /// Current credential together with the login generation it belongs to.
    pub(crate) fn snapshot(&self) -> (Option<Credential>, u64) {
        let session = self.read();
        (session.credential.clone(), session.generation)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn is_logged_in(&self) -> bool {
        self.read().logged_in
    }

    pub fn view(&self) -> SessionView {
        let session = self.read();
        SessionView {
            logged_in: session.logged_in,
            user: session.user.clone(),
            loading: session.loading,
            error: session.error,
        }
    }

    /// Whether the session currently holds exactly this refresh token
    /// (`None` matches a session without a credential).
    pub(crate) fn holds_refresh(&self, refresh: Option<&Secret<String>>) -> bool {
        let session = self.read();
        match (&session.credential, refresh) {
            (Some(current), Some(expected)) => current.refresh == *expected,
            (None, None) => true,
            _ => false,
        }
    }

    /// Serialize writers that update this state together with the store.
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    /// Load a persisted credential (and the cached profile, if any) ahead of
    /// validation. Not logged in yet.
    pub(crate) fn hydrate(&self, credential: Credential, cached: Option<UserProfile>) {
        let mut session = self.write();
        *session = Session {
            credential: Some(credential),
            user: cached,
            loading: true,
            generation: session.generation + 1,
            ..Session::default()
        };
    }

    /// Mark a validated session as logged in with the given profile.
    ///
    /// Returns false when the credential disappeared while validating.
    pub(crate) fn confirm(&self, user: UserProfile) -> bool {
        let mut session = self.write();
        if session.credential.is_none() {
            session.loading = false;
            return false;
        }
        session.user = Some(user);
        session.logged_in = true;
        session.loading = false;
        session.error = None;
        session.check_invariant();
        true
    }

    pub(crate) fn establish(&self, credential: Credential, user: UserProfile) {
        let mut session = self.write();
        *session = Session {
            logged_in: true,
            user: Some(user),
            credential: Some(credential),
            loading: false,
            error: None,
            generation: session.generation + 1,
        };
        session.check_invariant();
    }

    /// Replace the credential after a refresh, only if the session still
    /// holds `expected_refresh`. A session that ended (or was replaced by a
    /// new login) while the exchange was in flight is left alone.
    pub(crate) fn rotate(&self, expected_refresh: &Secret<String>, rotated: Credential) -> bool {
        let mut session = self.write();
        match &session.credential {
            Some(current) if current.refresh == *expected_refresh => {
                session.credential = Some(rotated);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&self) {
        let mut session = self.write();
        *session = Session {
            generation: session.generation + 1,
            ..Session::default()
        };
    }

    /// End the session, recording why.
    pub(crate) fn expire(&self, kind: SessionErrorKind) {
        let mut session = self.write();
        *session = Session {
            error: Some(kind),
            generation: session.generation + 1,
            ..Session::default()
        };
    }
}
