//! Session and token lifecycle management.
//!
//! This module provides:
//! - `TokenStore`: durable key-value persistence for the credential pair
//! - `TokenManager`: expiry detection and refresh-token exchange
//! - `AuthError`: the closed set of session failures
//!
//! Tokens are rotated by the backend on every refresh, so the manager
//! always persists the pair it most recently received.

pub mod error;
pub mod manager;
pub mod store;

pub use error::AuthError;
pub use manager::{TokenGrant, TokenManager};
pub use store::{KeyringTokenStore, MemoryTokenStore, TokenStore};
