use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::engine::location::{record_position, set_availability, stop_tracking, LocationFix};
use crate::engine::presence::{announce, depart, PresenceSnapshot};
use crate::engine::selector::RankedWorker;
use crate::error::AppError;
use crate::models::municipality::Municipality;
use crate::models::profile::{Availability, Profile, Role};
use crate::models::worker::{Coordinate, Worker};
use crate::session::Session;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workers", get(list_workers))
        .route("/workers/closest", get(closest_worker))
        .route("/me/location", put(update_location).delete(clear_location))
        .route("/me/availability", patch(update_availability))
        .route("/me/presence", post(go_online).delete(go_offline))
        .route("/municipalities", get(list_municipalities))
        .route("/municipalities/match", get(match_address))
        .route("/municipalities/presence", get(presence))
}

#[derive(Debug, Deserialize)]
pub struct WorkerQuery {
    pub search: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub availability: Availability,
}

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    #[serde(default)]
    pub address: String,
}

async fn list_workers(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<WorkerQuery>,
) -> Result<Json<Vec<RankedWorker>>, AppError> {
    session.require(Role::Government, "view workers")?;

    state.workers.refresh(state.store.as_ref()).await?;

    let target = Coordinate::from_parts(query.lat, query.lng);
    let search = query.search.as_deref().filter(|term| !term.trim().is_empty());

    Ok(Json(state.workers.rank(target.as_ref(), search, Utc::now())))
}

async fn closest_worker(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(target): Query<TargetQuery>,
) -> Result<Json<Worker>, AppError> {
    session.require(Role::Government, "view workers")?;

    state.workers.refresh(state.store.as_ref()).await?;

    let worker = state
        .workers
        .closest(&Coordinate::new(target.lat, target.lng), Utc::now())
        .ok_or(AppError::NoAvailableWorkers)?;

    Ok(Json(worker))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(coordinate): Json<Coordinate>,
) -> Result<Json<LocationFix>, AppError> {
    Ok(Json(record_position(&state, &session, coordinate).await?))
}

async fn clear_location(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<StatusCode, AppError> {
    stop_tracking(&state, &session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(
        set_availability(&state, &session, payload.availability).await?,
    ))
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<StatusCode, AppError> {
    announce(state.presence.as_ref(), &session)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn go_offline(State(state): State<Arc<AppState>>, session: Session) -> StatusCode {
    depart(state.presence.as_ref(), &session);
    StatusCode::NO_CONTENT
}

async fn list_municipalities(
    State(state): State<Arc<AppState>>,
    _session: Session,
) -> Result<Json<Vec<Municipality>>, AppError> {
    Ok(Json(state.municipalities.fetch(state.store.as_ref()).await?))
}

async fn match_address(
    State(state): State<Arc<AppState>>,
    _session: Session,
    Query(query): Query<MatchQuery>,
) -> Result<Json<Option<Municipality>>, AppError> {
    Ok(Json(
        state
            .municipalities
            .best_match(state.store.as_ref(), &query.address)
            .await?,
    ))
}

async fn presence(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<PresenceSnapshot>, AppError> {
    session.require(Role::Government, "view municipality presence")?;

    state.presence_tracker.reload(state.store.as_ref()).await?;
    Ok(Json(state.presence_tracker.snapshot(Utc::now())))
}
