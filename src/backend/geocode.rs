use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::backend::{BackendError, Geolocator, LocationError, ReverseGeocoder};
use crate::geo::coordinate_label;
use crate::models::worker::Coordinate;

const MOCK_DISTRICTS: [&str; 10] = [
    "Downtown",
    "Uptown",
    "Midtown",
    "East Side",
    "West Side",
    "North End",
    "South Side",
    "Central",
    "Heights",
    "Gardens",
];

const MOCK_STREETS: [&str; 10] = [
    "Main St",
    "Oak Ave",
    "Pine St",
    "Elm Dr",
    "Maple Ln",
    "Cedar Blvd",
    "Park Ave",
    "First St",
    "Second Ave",
    "Third St",
];

/// Deterministic street address derived from the coordinate. Used when no
/// geocoding endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct MockGeocoder;

#[async_trait]
impl ReverseGeocoder for MockGeocoder {
    async fn reverse(&self, point: Coordinate) -> Result<String, BackendError> {
        if !point.lat.is_finite() || !point.lng.is_finite() {
            return Err(BackendError::Rejected(format!(
                "cannot geocode non-finite coordinate {}",
                coordinate_label(&point)
            )));
        }

        let district = (point.lat * point.lng * 100.0).abs().floor() as usize % MOCK_DISTRICTS.len();
        let street = ((point.lat + point.lng) * 100.0).abs().floor() as usize % MOCK_STREETS.len();
        let number = ((point.lat * 1000.0).abs() % 9999.0).floor() as u32 + 1;

        Ok(format!(
            "{number} {}, {}",
            MOCK_STREETS[street], MOCK_DISTRICTS[district]
        ))
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
}

/// Client for a Nominatim-compatible `/reverse` endpoint.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
}

impl NominatimGeocoder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("waste-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| BackendError::Unavailable(format!("geocoder client: {err}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, point: Coordinate) -> Result<String, BackendError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("format", "json".to_string()),
                ("lat", point.lat.to_string()),
                ("lon", point.lng.to_string()),
            ])
            .send()
            .await
            .map_err(|err| BackendError::Unavailable(format!("reverse geocoding: {err}")))?
            .error_for_status()
            .map_err(|err| BackendError::Rejected(format!("reverse geocoding: {err}")))?;

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Rejected(format!("reverse geocoding body: {err}")))?;

        body.display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| BackendError::Rejected("no address for coordinate".to_string()))
    }
}

/// Best-effort address: the geocoder's answer, or the raw coordinate.
pub async fn address_or_label(geocoder: &dyn ReverseGeocoder, point: Coordinate) -> String {
    match geocoder.reverse(point).await {
        Ok(address) => address,
        Err(err) => {
            warn!(error = %err, "reverse geocoding failed; using coordinate text");
            coordinate_label(&point)
        }
    }
}

/// Geolocator with a preset answer.
#[derive(Debug, Clone)]
pub struct FixedGeolocator {
    answer: Result<Coordinate, LocationError>,
    delay: Duration,
}

impl FixedGeolocator {
    pub fn at(point: Coordinate) -> Self {
        Self {
            answer: Ok(point),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(err: LocationError) -> Self {
        Self {
            answer: Err(err),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.clone()
    }
}
