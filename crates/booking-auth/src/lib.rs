//! Credential persistence and remote auth exchanges for the booking dashboard
//!
//! Provides the key-value storage medium, the credential store that maps a
//! session onto it, and the three unauthenticated exchanges against the
//! booking REST service (login, refresh, register). This crate knows nothing
//! about in-memory session state; `booking-session` builds on top of it.
//!
//! Credential flow:
//! 1. Caller runs `token::login()` with username and password
//! 2. Credential persisted via `credentials::CredentialStore::save()`
//! 3. On a 401, the session layer calls `token::refresh_token()`
//! 4. Rotated tokens saved via `credentials::CredentialStore::save()`
//! 5. Logout or a denied refresh calls `credentials::CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod storage;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialStore, UserProfile};
pub use error::{Error, Result, truncate_body};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use token::{
    LoginRequest, LoginResponse, RefreshResponse, RegisterRequest, endpoint_url, login,
    refresh_token, register,
};
