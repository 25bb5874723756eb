//! Refresh coordination
//!
//! One refresh exchange per failure episode, no matter how many requests
//! hit a 401 at once. The first request to observe a 401 opens an episode:
//! a shared future that performs the exchange. Every request that fails
//! while the episode is open clones the same future and waits on it. When
//! the exchange settles the episode persists the outcome, updates session
//! state, and empties its slot before any waiter sees the result.
//!
//! States:
//! - Idle: slot empty
//! - RefreshInFlight: slot holds the shared episode future
//! - Settled: outcome computed; the episode clears its own slot, so the
//!   coordinator is Idle again by the time waiters resume
//!
//! A 401 for a token that has already been rotated (the response raced a
//! completed episode) is answered with the current credential without a new
//! exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use booking_auth::{Credential, CredentialStore};
use common::Secret;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::session::{SessionErrorKind, SessionState};

/// How an episode settled, as seen by each waiter.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// Replay with this credential
    Refreshed(Credential),
    /// Surface the original 401
    Denied,
}

struct Episode {
    id: u64,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionState>,
    store: CredentialStore,
    slot: Mutex<Option<Episode>>,
    next_id: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<Episode>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-flight refresh exchange shared by every request on a session.
///
/// Cheap to clone; clones share the same episode slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session: Arc<SessionState>,
        store: CredentialStore,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.into(),
                session,
                store,
                slot: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Whether an exchange is currently in flight.
    pub fn in_flight(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Recover from a 401 on a first attempt sent with `sent_with` while the
    /// session was at login `generation`.
    ///
    /// A request from an earlier login is denied outright, so it never picks
    /// up another login's credential. Otherwise joins the open episode, replays
    /// with a credential that already superseded the one sent, or opens a new
    /// episode.
    pub(crate) async fn recover(
        &self,
        sent_with: Option<&Secret<String>>,
        generation: u64,
    ) -> Outcome {
        let pending = {
            let mut slot = self.inner.slot();
            let (current, current_generation) = self.inner.session.snapshot();
            if sent_with.is_some() && current_generation != generation {
                debug!("request belongs to an ended session, not refreshing");
                return Outcome::Denied;
            }

            match slot.as_ref() {
                Some(episode) => {
                    debug!(episode = episode.id, "joining in-flight refresh");
                    metrics::counter!("session_refresh_waiters_total").increment(1);
                    episode.outcome.clone()
                }
                None => {
                    match (sent_with, current) {
                        (Some(sent), Some(current)) if current.access != *sent => {
                            debug!("access token already rotated, replaying without refresh");
                            return Outcome::Refreshed(current);
                        }
                        (None, Some(current)) => {
                            debug!("anonymous request rejected, replaying with session credential");
                            return Outcome::Refreshed(current);
                        }
                        _ => {}
                    }

                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                    let outcome = run_episode(self.inner.clone(), id).boxed().shared();
                    *slot = Some(Episode {
                        id,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };
        pending.await
    }
}

/// Perform one episode and return the coordinator to Idle.
async fn run_episode(inner: Arc<Inner>, id: u64) -> Outcome {
    let outcome = exchange(&inner, id).await;

    let mut slot = inner.slot();
    if slot.as_ref().is_some_and(|episode| episode.id == id) {
        *slot = None;
    }
    outcome
}

async fn exchange(inner: &Inner, id: u64) -> Outcome {
    let Some(current) = inner.session.credential() else {
        warn!(episode = id, "no refresh token available, ending session");
        settle_denied(inner, id, None).await;
        return Outcome::Denied;
    };

    info!(episode = id, "access token rejected, refreshing");
    let response =
        match booking_auth::refresh_token(&inner.http, &inner.base_url, current.refresh.expose())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(episode = id, error = %e, "token refresh failed, ending session");
                settle_denied(inner, id, Some(&current.refresh)).await;
                return Outcome::Denied;
            }
        };

    let rotated = Credential {
        access: response.access,
        refresh: response.refresh.unwrap_or_else(|| current.refresh.clone()),
    };

    let _writes = inner.session.lock_writes().await;
    if !inner.session.holds_refresh(Some(&current.refresh)) {
        info!(episode = id, "session changed during refresh, discarding new credential");
        metrics::counter!("session_refresh_total", "outcome" => "discarded").increment(1);
        return Outcome::Denied;
    }
    if let Err(e) = inner.store.save(&rotated).await {
        warn!(episode = id, error = %e, "failed to persist refreshed credential");
    }
    inner.session.rotate(&current.refresh, rotated.clone());

    metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
    info!(episode = id, "token refresh succeeded");
    Outcome::Refreshed(rotated)
}

/// Tear the session down after a failed episode.
///
/// Skipped when the session no longer holds the refresh token that failed
/// (a new login landed while the exchange was in flight).
async fn settle_denied(inner: &Inner, id: u64, failed_refresh: Option<&Secret<String>>) {
    metrics::counter!("session_refresh_total", "outcome" => "denied").increment(1);

    let _writes = inner.session.lock_writes().await;
    if !inner.session.holds_refresh(failed_refresh) {
        debug!(episode = id, "session replaced during refresh, leaving it intact");
        return;
    }
    if let Err(e) = inner.store.clear().await {
        warn!(episode = id, error = %e, "failed to clear credential store");
    }
    inner.session.expire(SessionErrorKind::RefreshDenied);
}
