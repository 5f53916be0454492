use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::reports::{
    create_report, create_task, list_reports, list_tasks, notifications, submit_feedback,
    update_report_status, update_task_status, FeedbackDraft, TaskUpdate,
};
use crate::engine::workers::{assign_worker, auto_assign};
use crate::error::AppError;
use crate::models::feedback::Feedback;
use crate::models::notification::Notification;
use crate::models::report::{Report, ReportDraft, ReportStatus};
use crate::models::task::{Task, TaskDraft};
use crate::session::Session;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reports", post(create).get(list))
        .route("/reports/:id/status", patch(set_status))
        .route("/reports/:id/feedback", post(feedback))
        .route("/reports/:id/assign", post(assign))
        .route("/reports/:id/auto-assign", post(auto))
        .route("/tasks", post(new_task).get(tasks))
        .route("/tasks/:id/status", patch(set_task_status))
        .route("/notifications", get(inbox))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: ReportStatus,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub worker_id: Uuid,
}

async fn create(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(draft): Json<ReportDraft>,
) -> Result<Json<Report>, AppError> {
    Ok(Json(create_report(&state, &session, draft).await?))
}

async fn list(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<Report>>, AppError> {
    Ok(Json(list_reports(&state, &session).await?))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<Report>, AppError> {
    Ok(Json(
        update_report_status(&state, &session, id, payload.status).await?,
    ))
}

async fn feedback(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(draft): Json<FeedbackDraft>,
) -> Result<Json<Feedback>, AppError> {
    Ok(Json(submit_feedback(&state, &session, id, draft).await?))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(
        assign_worker(&state, &session, payload.worker_id, id).await?,
    ))
}

async fn auto(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(auto_assign(&state, &session, id).await?))
}

async fn new_task(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(create_task(&state, &session, draft).await?))
}

async fn tasks(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<Task>>, AppError> {
    Ok(Json(list_tasks(&state, &session).await?))
}

async fn set_task_status(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(change): Json<TaskUpdate>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(update_task_status(&state, &session, id, change).await?))
}

async fn inbox(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(notifications(&state, &session).await?))
}
