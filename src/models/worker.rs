use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::profile::{Availability, Profile};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Pairs two optional columns; both must be present.
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }
}

/// A municipality staff member as seen by the dispatcher: matched by live
/// coordinate proximity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub address: Option<String>,
    pub location: Option<Coordinate>,
    pub current_address: Option<String>,
    pub availability: Availability,
    pub last_location_update: Option<DateTime<Utc>>,
    pub is_online: bool,
}

impl Worker {
    pub fn from_profile(profile: Profile, is_online: bool) -> Self {
        let location =
            Coordinate::from_parts(profile.current_location_lat, profile.current_location_lng);
        let full_name = profile.display_name().to_string();

        Self {
            user_id: profile.user_id,
            full_name,
            email: profile.email,
            address: profile.address,
            location,
            current_address: profile.current_address,
            availability: profile.availability_status,
            last_location_update: profile.last_location_update,
            is_online,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.is_online && self.availability == Availability::Available && self.location.is_some()
    }

    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.full_name.to_lowercase().contains(&term)
            || self.email.to_lowercase().contains(&term)
            || self
                .current_address
                .as_deref()
                .is_some_and(|address| address.to_lowercase().contains(&term))
    }
}
