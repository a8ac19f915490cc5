//! Core library for sitecheck, a field client for utility/highway
//! excavation permit inspections.
//!
//! The interesting part lives in [`auth`]: token storage, expiry detection
//! with an early-refresh margin, silent refresh with rotation, and the
//! single-flight serialization that keeps concurrent callers from racing
//! each other's refresh. [`api`] wraps every outbound call in a pre-flight
//! expiry check and a one-shot refresh-and-retry on 401, so call sites
//! never see a mid-flight token expiry.
//!
//! Everything else is plumbing: permit/inspection models, an on-disk cache
//! for offline viewing, and JSON config.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
