use serde::{Deserialize, Serialize};

/// Excavation permit in the shape the mobile API serves.
///
/// `id` and `permit_number` both carry the permit reference; the proximity
/// risk comes from the desktop assessment and is uppercased by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permit {
    pub id: String,
    pub permit_number: String,
    #[serde(default)]
    pub works_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub highway_authority: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub proximity_risk_assessment: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub inspection_status: String,
    #[serde(default)]
    pub inspection_results: Option<InspectionResults>,
    #[serde(default)]
    pub sample_status: String,
    #[serde(default)]
    pub sample_results: Option<SampleResults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionResults {
    #[serde(default)]
    pub bituminous: String,
    #[serde(default)]
    pub sub_base: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleResults {
    #[serde(default)]
    pub sample1_determinants: Vec<Determinant>,
    #[serde(default)]
    pub sample2_determinants: Vec<Determinant>,
}

/// One determinant line from the sample-testing form (e.g. coal tar,
/// petroleum, heavy metals, asbestos).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Determinant {
    pub name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub concentration: String,
}

impl Permit {
    /// True when the desktop assessment flagged the site as anything other
    /// than low risk.
    pub fn is_elevated_risk(&self) -> bool {
        !self.proximity_risk_assessment.is_empty()
            && !self.proximity_risk_assessment.eq_ignore_ascii_case("low")
    }

    pub fn inspection_complete(&self) -> bool {
        self.inspection_status.eq_ignore_ascii_case("completed")
    }
}
