use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body for inspection and sample-testing save/submit endpoints.
/// `form_data` is the raw multi-section form content; the backend persists
/// it without interpreting individual fields.
#[derive(Debug, Clone, Serialize)]
pub struct FormSubmission {
    pub permit_ref: String,
    pub form_data: Value,
}

impl FormSubmission {
    pub fn new(permit_ref: impl Into<String>, form_data: Value) -> Self {
        Self {
            permit_ref: permit_ref.into(),
            form_data,
        }
    }
}

/// Acknowledgement from a save/submit endpoint.
/// `status` is `wip` for drafts and `completed` for final submissions.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionReceipt {
    pub message: String,
    pub status: String,
}

impl SubmissionReceipt {
    pub fn is_draft(&self) -> bool {
        self.status == "wip"
    }
}
