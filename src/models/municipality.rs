use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::profile::Profile;

/// A municipality staff member as seen by address matching and presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Municipality {
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub address: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Municipality {
    pub fn from_profile(profile: Profile) -> Self {
        let full_name = profile.display_name().to_string();

        Self {
            user_id: profile.user_id,
            full_name,
            email: profile.email,
            address: profile.address,
            is_online: false,
            last_seen: None,
        }
    }
}
