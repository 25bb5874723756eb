//! Session-aware API client for the classroom booking service
//!
//! Keeps a user session alive across an access/refresh token pair. Every
//! request carries the current bearer token read from in-memory session
//! state; a 401 hands off to the refresh coordinator, which runs at most one
//! refresh exchange at a time and replays every waiting request once with
//! the new token.
//!
//! Request lifecycle:
//! 1. `ApiClient::execute` attaches `Authorization: Bearer <access>`
//! 2. Non-401 responses (and transport errors) return to the caller untouched
//! 3. A first-attempt 401 joins or starts a refresh episode
//! 4. Episode succeeds → credential persisted, session rotated, request replayed once
//! 5. Episode fails → session ends, store cleared, caller sees the original 401

pub mod client;
pub mod context;
pub mod error;
pub mod refresh;
pub mod session;

#[cfg(test)]
mod mock;

pub use client::{ApiClient, ApiRequest, ApiResponse, Attempt};
pub use context::SessionContext;
pub use error::{Error, Result};
pub use refresh::RefreshCoordinator;
pub use session::{SessionErrorKind, SessionState, SessionView};
