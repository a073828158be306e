use serde::{Deserialize, Serialize};

/// Where a user stands in the admin approval flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Enabled,
    Declined,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Enabled => "enabled",
            ApprovalStatus::Declined => "declined",
        }
    }
}
