use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::engine::jobs::{
    all_applications, apply, create_job, list_active_jobs, my_applications,
    update_application_status, upload_resume, ApplicationReview,
};
use crate::engine::media::{upload_photos, Upload, MAX_PHOTOS, MAX_PHOTO_BYTES};
use crate::error::AppError;
use crate::models::job::{ApplicationDraft, ApplicationView, JobApplication, JobDraft, JobListing};
use crate::models::profile::Role;
use crate::session::Session;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(post_job))
        .route("/jobs/:id/applications", post(submit_application))
        .route("/applications", get(applications))
        .route("/applications/:id/status", patch(review_application))
        .route("/uploads/photos", post(photos))
        .route("/uploads/resume", post(resume))
        // Room for a full set of photos plus multipart framing.
        .layer(DefaultBodyLimit::max(MAX_PHOTOS * MAX_PHOTO_BYTES + 64 * 1024))
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub urls: Vec<String>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobListing>>, AppError> {
    Ok(Json(list_active_jobs(&state).await?))
}

async fn post_job(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(draft): Json<JobDraft>,
) -> Result<Json<JobListing>, AppError> {
    Ok(Json(create_job(&state, &session, draft).await?))
}

async fn submit_application(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(draft): Json<ApplicationDraft>,
) -> Result<Json<JobApplication>, AppError> {
    Ok(Json(apply(&state, &session, id, draft).await?))
}

/// Government sees every application; everyone else sees their own.
async fn applications(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<ApplicationView>>, AppError> {
    let views = if session.is(Role::Government) {
        all_applications(&state, &session).await?
    } else {
        my_applications(&state, &session).await?
    };
    Ok(Json(views))
}

async fn review_application(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(review): Json<ApplicationReview>,
) -> Result<Json<JobApplication>, AppError> {
    Ok(Json(
        update_application_status(&state, &session, id, review).await?,
    ))
}

async fn photos(
    State(state): State<Arc<AppState>>,
    session: Session,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let files = read_files(multipart).await?;
    let urls = upload_photos(&state, &session, files).await?;
    Ok(Json(UploadResponse { urls }))
}

async fn resume(
    State(state): State<Arc<AppState>>,
    session: Session,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let file = read_files(multipart)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BadRequest("attach a resume file".to_string()))?;

    let url = upload_resume(
        &state,
        &session,
        &file.file_name,
        file.bytes,
        &file.content_type,
    )
    .await?;
    Ok(Json(UploadResponse { urls: vec![url] }))
}

/// Every part with a file name, in request order.
async fn read_files(mut multipart: Multipart) -> Result<Vec<Upload>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        debug!(error = %err, "failed to read multipart field");
        AppError::BadRequest(format!("failed to read multipart data: {err}"))
    })? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::BadRequest(format!("failed to read {file_name}: {err}")))?;

        files.push(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Ok(files)
}
