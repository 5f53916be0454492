use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Record, Table};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Citizen,
    Municipality,
    Government,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Municipality => "municipality",
            Role::Government => "government",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "citizen" => Ok(Role::Citizen),
            "municipality" => Ok(Role::Municipality),
            "government" => Ok(Role::Government),
            other => Err(format!(
                "unknown role: {other}, expected citizen/municipality/government"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
    #[default]
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Busy => "busy",
            Availability::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub address: Option<String>,
    pub current_location_lat: Option<f64>,
    pub current_location_lng: Option<f64>,
    pub current_address: Option<String>,
    #[serde(default)]
    pub availability_status: Availability,
    pub last_location_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Full name when set, email otherwise.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> Uuid {
        self.id
    }
}
