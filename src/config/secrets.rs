//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the database URL and the
//! destination service password.

pub use secrecy::{ExposeSecret, SecretString};
