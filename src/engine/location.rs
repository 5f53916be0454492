use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::info;

use crate::backend::geocode::address_or_label;
use crate::backend::{update, Geolocator, LocationError};
use crate::engine::profile_for;
use crate::error::AppError;
use crate::models::profile::{Availability, Profile, Role};
use crate::models::worker::Coordinate;
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackingOutcome {
    Tracked(LocationFix),
    /// No position could be obtained; the user types an address instead.
    ManualEntry { reason: String },
}

/// Acquires a position within the configured wait and records it. Denied,
/// unsupported or slow geolocation is an expected outcome, not an error.
pub async fn start_tracking(
    state: &AppState,
    session: &Session,
    geolocator: &dyn Geolocator,
) -> Result<TrackingOutcome, AppError> {
    let position = match timeout(state.geolocation_timeout, geolocator.current_position()).await {
        Ok(Ok(position)) => position,
        Ok(Err(err)) => return Ok(manual_entry(session, err)),
        Err(_) => return Ok(manual_entry(session, LocationError::Timeout)),
    };

    let fix = record_position(state, session, position).await?;
    Ok(TrackingOutcome::Tracked(fix))
}

fn manual_entry(session: &Session, err: LocationError) -> TrackingOutcome {
    info!(user_id = %session.user_id, reason = %err, "falling back to manual address entry");
    TrackingOutcome::ManualEntry {
        reason: err.to_string(),
    }
}

/// Reverse-geocodes a position and, for municipality users, stores it as
/// their live location.
pub async fn record_position(
    state: &AppState,
    session: &Session,
    coordinate: Coordinate,
) -> Result<LocationFix, AppError> {
    let address = address_or_label(state.geocoder.as_ref(), coordinate).await;

    if session.is(Role::Municipality) {
        let profile = profile_for(state.store.as_ref(), session.user_id).await?;
        update::<Profile>(
            state.store.as_ref(),
            profile.id,
            json!({
                "current_location_lat": coordinate.lat,
                "current_location_lng": coordinate.lng,
                "current_address": address,
                "last_location_update": Utc::now(),
            }),
        )
        .await?;
        info!(user_id = %session.user_id, address = %address, "worker location updated");
    }

    Ok(LocationFix {
        coordinate,
        address,
    })
}

pub async fn stop_tracking(state: &AppState, session: &Session) -> Result<(), AppError> {
    if !session.is(Role::Municipality) {
        return Ok(());
    }

    let profile = profile_for(state.store.as_ref(), session.user_id).await?;
    update::<Profile>(
        state.store.as_ref(),
        profile.id,
        json!({
            "current_location_lat": Value::Null,
            "current_location_lng": Value::Null,
            "current_address": Value::Null,
            "last_location_update": Value::Null,
        }),
    )
    .await?;
    info!(user_id = %session.user_id, "worker location cleared");

    Ok(())
}

pub async fn set_availability(
    state: &AppState,
    session: &Session,
    availability: Availability,
) -> Result<Profile, AppError> {
    let profile = profile_for(state.store.as_ref(), session.user_id).await?;
    let updated = update::<Profile>(
        state.store.as_ref(),
        profile.id,
        json!({ "availability_status": availability }),
    )
    .await?;
    info!(user_id = %session.user_id, status = availability.as_str(), "availability updated");

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use uuid::Uuid;

    use super::{set_availability, start_tracking, stop_tracking, TrackingOutcome};
    use crate::backend::geocode::FixedGeolocator;
    use crate::backend::{LocationError, Table};
    use crate::config::Config;
    use crate::engine::profile_for;
    use crate::models::profile::{Availability, Role};
    use crate::models::worker::Coordinate;
    use crate::session::Session;
    use crate::state::AppState;

    async fn worker_session(state: &AppState) -> Session {
        let user_id = Uuid::new_v4();
        state
            .store
            .insert(
                Table::Profiles,
                json!({
                    "user_id": user_id,
                    "full_name": "Ravi",
                    "email": "ravi@city.test",
                    "role": "municipality",
                }),
            )
            .await
            .unwrap();
        Session::new(user_id, Role::Municipality)
    }

    #[tokio::test]
    async fn tracked_position_is_written_to_profile() {
        let state = AppState::in_memory(&Config::default());
        let session = worker_session(&state).await;
        let geolocator = FixedGeolocator::at(Coordinate::new(12.5, 77.5));

        let outcome = start_tracking(&state, &session, &geolocator).await.unwrap();
        let TrackingOutcome::Tracked(fix) = outcome else {
            panic!("expected a fix, got {outcome:?}");
        };
        assert!(!fix.address.is_empty());

        let profile = profile_for(state.store.as_ref(), session.user_id).await.unwrap();
        assert_eq!(profile.current_location_lat, Some(12.5));
        assert_eq!(profile.current_address.as_deref(), Some(fix.address.as_str()));
        assert!(profile.last_location_update.is_some());

        stop_tracking(&state, &session).await.unwrap();
        let profile = profile_for(state.store.as_ref(), session.user_id).await.unwrap();
        assert!(profile.current_location_lat.is_none());
        assert!(profile.last_location_update.is_none());
    }

    #[tokio::test]
    async fn denied_permission_falls_back_to_manual_entry() {
        let state = AppState::in_memory(&Config::default());
        let session = worker_session(&state).await;
        let geolocator = FixedGeolocator::failing(LocationError::Denied);

        let outcome = start_tracking(&state, &session, &geolocator).await.unwrap();
        assert!(matches!(outcome, TrackingOutcome::ManualEntry { .. }));
    }

    #[tokio::test]
    async fn slow_geolocation_times_out() {
        let config = Config {
            geolocation_timeout_ms: 20,
            ..Config::default()
        };
        let state = AppState::in_memory(&config);
        let session = worker_session(&state).await;
        let geolocator = FixedGeolocator::at(Coordinate::new(1.0, 1.0))
            .with_delay(Duration::from_secs(5));

        let outcome = start_tracking(&state, &session, &geolocator).await.unwrap();
        assert_eq!(
            outcome,
            TrackingOutcome::ManualEntry {
                reason: LocationError::Timeout.to_string()
            }
        );
    }

    #[tokio::test]
    async fn availability_is_persisted() {
        let state = AppState::in_memory(&Config::default());
        let session = worker_session(&state).await;

        let profile = set_availability(&state, &session, Availability::Busy).await.unwrap();
        assert_eq!(profile.availability_status, Availability::Busy);
    }
}
