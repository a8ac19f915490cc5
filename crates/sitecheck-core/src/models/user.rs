use serde::{Deserialize, Serialize};

/// Account details returned alongside the token grant on login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub license_tier: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl UserProfile {
    pub fn license_display(&self) -> &str {
        self.license_tier.as_deref().unwrap_or("standard")
    }
}
