//! Domain models for permits, inspections, and users.
//!
//! Shapes mirror the mobile JSON the backend serves. Inspection and
//! sample-testing form contents stay opaque (`serde_json::Value`); the
//! backend stores them as submitted.

pub mod inspection;
pub mod permit;
pub mod user;

pub use inspection::{FormSubmission, SubmissionReceipt};
pub use permit::{Determinant, InspectionResults, Permit, SampleResults};
pub use user::UserProfile;
