use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{fetch, fetch_one, insert, update, Query};
use crate::engine::media::MAX_PHOTOS;
use crate::error::AppError;
use crate::models::feedback::Feedback;
use crate::models::notification::Notification;
use crate::models::profile::Role;
use crate::models::report::{Report, ReportDraft, ReportStatus};
use crate::models::task::{Task, TaskDraft, TaskStatus};
use crate::session::Session;
use crate::state::AppState;
use crate::sync::SyncScope;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub notes: Option<String>,
    pub photo_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackDraft {
    pub rating: Option<u8>,
    pub comment: Option<String>,
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn check_transition(
    state: &AppState,
    entity: &str,
    from: &str,
    to: &str,
    allowed: bool,
) -> Result<(), AppError> {
    if allowed || !state.strict_transitions {
        return Ok(());
    }

    state
        .metrics
        .status_updates_total
        .with_label_values(&[entity, "rejected"])
        .inc();
    Err(AppError::Conflict(format!(
        "{entity} cannot move from {from} to {to}"
    )))
}

pub async fn create_report(
    state: &AppState,
    session: &Session,
    draft: ReportDraft,
) -> Result<Report, AppError> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest(
            "please fill in all required fields: title".to_string(),
        ));
    }
    if draft.photo_urls.len() > MAX_PHOTOS {
        return Err(AppError::BadRequest(format!(
            "you can only attach up to {MAX_PHOTOS} photos"
        )));
    }

    let photo_urls = (!draft.photo_urls.is_empty()).then_some(draft.photo_urls);
    let row = json!({
        "reporter_id": session.user_id,
        "title": title,
        "description": non_empty(draft.description),
        "waste_type": draft.waste_type,
        "location_lat": draft.location.map(|point| point.lat),
        "location_lng": draft.location.map(|point| point.lng),
        "address": non_empty(draft.address),
        "status": ReportStatus::Pending,
        "priority": draft.priority,
        "photo_urls": photo_urls,
        "verified_by": Value::Null,
        "assigned_to": Value::Null,
        "verified_at": Value::Null,
        "completed_at": Value::Null,
    });

    let report = insert::<Report>(state.store.as_ref(), row).await?;
    state.metrics.reports_created_total.inc();
    info!(
        report_id = %report.id,
        reporter_id = %session.user_id,
        waste_type = ?report.waste_type,
        "report created"
    );

    Ok(report)
}

/// Reports visible to the session, newest first.
pub async fn list_reports(state: &AppState, session: &Session) -> Result<Vec<Report>, AppError> {
    let scope = SyncScope::for_session(session);
    let Some(filter) = scope.reports else {
        return Ok(Vec::new());
    };

    Ok(fetch::<Report>(state.store.as_ref(), &filter.query().newest_first()).await?)
}

pub async fn update_report_status(
    state: &AppState,
    session: &Session,
    report_id: Uuid,
    status: ReportStatus,
) -> Result<Report, AppError> {
    let report = fetch_one::<Report>(state.store.as_ref(), report_id).await?;

    match session.role {
        Role::Citizen => {
            return Err(AppError::Forbidden(
                "citizen users cannot change report status".to_string(),
            ));
        }
        Role::Municipality if report.assigned_to != Some(session.user_id) => {
            return Err(AppError::Forbidden(
                "report is not assigned to this worker".to_string(),
            ));
        }
        _ => {}
    }

    check_transition(
        state,
        "report",
        report.status.as_str(),
        status.as_str(),
        report.status.can_transition_to(status),
    )?;

    let mut patch = json!({ "status": status });
    match status {
        ReportStatus::Verified => {
            patch["verified_by"] = json!(session.user_id);
            patch["verified_at"] = json!(Utc::now());
        }
        ReportStatus::Completed => {
            patch["completed_at"] = json!(Utc::now());
        }
        _ => {}
    }

    let updated = update::<Report>(state.store.as_ref(), report_id, patch).await?;
    state
        .metrics
        .status_updates_total
        .with_label_values(&["report", "success"])
        .inc();
    info!(
        report_id = %report_id,
        from = report.status.as_str(),
        to = status.as_str(),
        "report status updated"
    );

    Ok(updated)
}

pub async fn create_task(
    state: &AppState,
    session: &Session,
    draft: TaskDraft,
) -> Result<Task, AppError> {
    session.require(Role::Government, "create tasks")?;
    fetch_one::<Report>(state.store.as_ref(), draft.report_id).await?;

    insert_task(state, session, draft).await
}

/// Inserts a task for an existing report.
pub(crate) async fn insert_task(
    state: &AppState,
    session: &Session,
    draft: TaskDraft,
) -> Result<Task, AppError> {
    let row = json!({
        "report_id": draft.report_id,
        "assigned_to": draft.assigned_to,
        "assigned_by": session.user_id,
        "status": TaskStatus::Assigned,
        "notes": non_empty(draft.notes),
        "task_address": non_empty(draft.address),
        "task_location_lat": draft.location.map(|point| point.lat),
        "task_location_lng": draft.location.map(|point| point.lng),
        "completion_photo_urls": Value::Null,
        "estimated_completion": draft.estimated_completion,
        "actual_completion": Value::Null,
    });

    let task = insert::<Task>(state.store.as_ref(), row).await?;
    info!(
        task_id = %task.id,
        report_id = %task.report_id,
        assigned_to = %task.assigned_to,
        "task created"
    );

    Ok(task)
}

pub async fn list_tasks(state: &AppState, session: &Session) -> Result<Vec<Task>, AppError> {
    let scope = SyncScope::for_session(session);
    let filter = scope.tasks.ok_or_else(|| {
        AppError::Forbidden(format!("{} users cannot view tasks", session.role.as_str()))
    })?;

    Ok(fetch::<Task>(state.store.as_ref(), &filter.query().newest_first()).await?)
}

pub async fn update_task_status(
    state: &AppState,
    session: &Session,
    task_id: Uuid,
    change: TaskUpdate,
) -> Result<Task, AppError> {
    let task = fetch_one::<Task>(state.store.as_ref(), task_id).await?;

    let permitted = session.is(Role::Government)
        || (session.is(Role::Municipality) && task.assigned_to == session.user_id);
    if !permitted {
        return Err(AppError::Forbidden(
            "task is not assigned to this user".to_string(),
        ));
    }

    check_transition(
        state,
        "task",
        task.status.as_str(),
        change.status.as_str(),
        task.status.can_transition_to(change.status),
    )?;

    let mut patch = json!({ "status": change.status });
    if let Some(notes) = non_empty(change.notes) {
        patch["notes"] = json!(notes);
    }
    if let Some(photo_urls) = change.photo_urls {
        patch["completion_photo_urls"] = json!(photo_urls);
    }
    if change.status == TaskStatus::Completed {
        patch["actual_completion"] = json!(Utc::now());
    }

    let updated = update::<Task>(state.store.as_ref(), task_id, patch).await?;
    state
        .metrics
        .status_updates_total
        .with_label_values(&["task", "success"])
        .inc();
    info!(
        task_id = %task_id,
        from = task.status.as_str(),
        to = change.status.as_str(),
        "task status updated"
    );

    Ok(updated)
}

pub async fn submit_feedback(
    state: &AppState,
    session: &Session,
    report_id: Uuid,
    draft: FeedbackDraft,
) -> Result<Feedback, AppError> {
    let rating = match draft.rating {
        None | Some(0) => {
            return Err(AppError::BadRequest(
                "please provide a rating before submitting".to_string(),
            ));
        }
        Some(rating @ 1..=5) => rating,
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "rating must be between 1 and 5, got {other}"
            )));
        }
    };

    let report = fetch_one::<Report>(state.store.as_ref(), report_id).await?;
    if report.reporter_id != session.user_id {
        return Err(AppError::Forbidden(
            "only the reporter can rate this report".to_string(),
        ));
    }
    if report.status != ReportStatus::Completed {
        warn!(report_id = %report_id, status = report.status.as_str(), "feedback on unfinished report");
    }

    let row = json!({
        "report_id": report_id,
        "user_id": session.user_id,
        "rating": rating,
        "comment": non_empty(draft.comment),
    });

    Ok(insert::<Feedback>(state.store.as_ref(), row).await?)
}

pub async fn notifications(
    state: &AppState,
    session: &Session,
) -> Result<Vec<Notification>, AppError> {
    let query = Query::new().eq("user_id", session.user_id).newest_first();
    Ok(fetch::<Notification>(state.store.as_ref(), &query).await?)
}
