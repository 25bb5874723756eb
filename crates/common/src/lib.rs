//! Common types for the booking dashboard workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
