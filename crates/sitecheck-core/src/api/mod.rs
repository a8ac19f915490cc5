//! REST API client for the sitecheck backend.
//!
//! Every data call goes through [`ApiClient`], which consults the token
//! manager before and after each request so call sites never handle token
//! expiry themselves. Authentication uses JWT bearer tokens obtained from
//! the mobile login endpoint and silently refreshed thereafter.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
