//! On-disk cache for permit data and the signed-in user profile.
//!
//! Lets the permit list render offline and survives restarts. Everything
//! here is session-scoped: `clear` is called whenever the session is torn
//! down so a later login never sees another user's data.

pub mod manager;

pub use manager::{CacheManager, CachedData};
