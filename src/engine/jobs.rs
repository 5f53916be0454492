use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::backend::{fetch, fetch_one, insert, update, Query};
use crate::engine::media::{sanitize_file_name, RESUME_BUCKET};
use crate::error::AppError;
use crate::models::job::{
    ApplicantSummary, ApplicationDraft, ApplicationStatus, ApplicationView, JobApplication,
    JobDraft, JobListing, JobSummary,
};
use crate::models::profile::{Profile, Role};
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationReview {
    pub status: ApplicationStatus,
    pub interview_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

pub async fn list_active_jobs(state: &AppState) -> Result<Vec<JobListing>, AppError> {
    let query = Query::new().eq("is_active", true).newest_first();
    Ok(fetch::<JobListing>(state.store.as_ref(), &query).await?)
}

pub async fn create_job(
    state: &AppState,
    session: &Session,
    draft: JobDraft,
) -> Result<JobListing, AppError> {
    session.require(Role::Government, "post jobs")?;

    let title = draft.title.trim();
    let description = draft.description.trim();
    if title.is_empty() || description.is_empty() {
        return Err(AppError::BadRequest(
            "title and description are required".to_string(),
        ));
    }

    let row = json!({
        "title": title,
        "description": description,
        "requirements": draft.requirements,
        "location": draft.location,
        "department": draft.department,
        "job_type": draft.job_type,
        "salary_range": draft.salary_range,
        "posted_by": session.user_id,
        "is_active": true,
    });

    let job = insert::<JobListing>(state.store.as_ref(), row).await?;
    info!(job_id = %job.id, title = %job.title, "job posted");
    Ok(job)
}

/// One application per job and applicant.
pub async fn apply(
    state: &AppState,
    session: &Session,
    job_id: Uuid,
    draft: ApplicationDraft,
) -> Result<JobApplication, AppError> {
    let store = state.store.as_ref();

    let job = fetch_one::<JobListing>(store, job_id).await?;
    if !job.is_active {
        return Err(AppError::Conflict(format!("job {job_id} is closed")));
    }

    let existing = Query::new()
        .eq("job_id", job_id)
        .eq("applicant_id", session.user_id);
    if !fetch::<JobApplication>(store, &existing).await?.is_empty() {
        return Err(AppError::Conflict(
            "you have already applied for this job".to_string(),
        ));
    }

    let row = json!({
        "job_id": job_id,
        "applicant_id": session.user_id,
        "resume_url": draft.resume_url,
        "cover_letter": draft.cover_letter,
        "contact_phone": draft.contact_phone,
        "status": ApplicationStatus::Submitted,
        "interview_date": Value::Null,
        "interview_notes": Value::Null,
        "reviewed_by": Value::Null,
    });

    let application = insert::<JobApplication>(store, row).await?;
    info!(application_id = %application.id, job_id = %job_id, "application submitted");
    Ok(application)
}

pub async fn my_applications(
    state: &AppState,
    session: &Session,
) -> Result<Vec<ApplicationView>, AppError> {
    let query = Query::new()
        .eq("applicant_id", session.user_id)
        .newest_first();
    let applications = fetch::<JobApplication>(state.store.as_ref(), &query).await?;
    join_applications(state, applications).await
}

pub async fn all_applications(
    state: &AppState,
    session: &Session,
) -> Result<Vec<ApplicationView>, AppError> {
    session.require(Role::Government, "review applications")?;

    let applications =
        fetch::<JobApplication>(state.store.as_ref(), &Query::new().newest_first()).await?;
    join_applications(state, applications).await
}

/// Attaches listing and applicant details with one lookup per table.
async fn join_applications(
    state: &AppState,
    applications: Vec<JobApplication>,
) -> Result<Vec<ApplicationView>, AppError> {
    if applications.is_empty() {
        return Ok(Vec::new());
    }

    let store = state.store.as_ref();
    let job_ids: Vec<Uuid> = applications.iter().map(|a| a.job_id).collect();
    let applicant_ids: Vec<Uuid> = applications.iter().map(|a| a.applicant_id).collect();

    let jobs: HashMap<Uuid, JobSummary> =
        fetch::<JobListing>(store, &Query::new().in_values("id", job_ids))
            .await?
            .iter()
            .map(|job| (job.id, JobSummary::from(job)))
            .collect();
    let applicants: HashMap<Uuid, ApplicantSummary> =
        fetch::<Profile>(store, &Query::new().in_values("user_id", applicant_ids))
            .await?
            .into_iter()
            .map(|profile| {
                (
                    profile.user_id,
                    ApplicantSummary {
                        full_name: profile.full_name,
                        email: profile.email,
                        phone: profile.phone,
                    },
                )
            })
            .collect();

    Ok(applications
        .into_iter()
        .map(|application| ApplicationView {
            job: jobs.get(&application.job_id).cloned(),
            applicant: applicants.get(&application.applicant_id).cloned(),
            application,
        })
        .collect())
}

pub async fn update_application_status(
    state: &AppState,
    session: &Session,
    application_id: Uuid,
    review: ApplicationReview,
) -> Result<JobApplication, AppError> {
    session.require(Role::Government, "review applications")?;

    let mut patch = json!({
        "status": review.status,
        "reviewed_by": session.user_id,
    });
    if let Some(date) = review.interview_date {
        patch["interview_date"] = json!(date);
    }
    if let Some(notes) = review.notes {
        patch["interview_notes"] = json!(notes);
    }

    let updated = update::<JobApplication>(state.store.as_ref(), application_id, patch).await?;
    info!(application_id = %application_id, status = ?review.status, "application reviewed");
    Ok(updated)
}

pub async fn upload_resume(
    state: &AppState,
    session: &Session,
    file_name: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<String, AppError> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("resume file is empty".to_string()));
    }

    let path = format!(
        "{}/{}-{}",
        session.user_id,
        Utc::now().timestamp_millis(),
        sanitize_file_name(file_name)
    );

    state
        .storage
        .upload(RESUME_BUCKET, &path, bytes, content_type)
        .await
        .inspect_err(|err| error!(error = %err, path = %path, "resume upload failed"))?;

    Ok(state.storage.public_url(RESUME_BUCKET, &path))
}
