//! Remote paths and persisted storage keys
//!
//! Paths are relative to the configured API base URL
//! (e.g. `https://booking.example.edu/api/v1`).

/// Login exchange: username/password for a credential pair
pub const LOGIN_PATH: &str = "/login";

/// Refresh exchange: refresh token for a new access token
pub const REFRESH_PATH: &str = "/refresh-token";

/// Profile check used to validate a persisted session
pub const PROFILE_PATH: &str = "/profile";

/// Account registration
pub const REGISTER_PATH: &str = "/register";

/// Storage key for the current access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the current refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the logged-in marker ("true" when present)
pub const IS_LOGGED_IN_KEY: &str = "is_logged_in";

/// Storage key for the cached user profile (JSON text)
pub const USER_KEY: &str = "user";

/// Every key the credential store owns. `clear()` removes all of them.
pub const SESSION_KEYS: &[&str] = &[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, IS_LOGGED_IN_KEY, USER_KEY];
