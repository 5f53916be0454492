use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{fetch, fetch_one, update, Query, Store, Table};
use crate::engine::reports::insert_task;
use crate::engine::selector::{find_closest_worker, rank_workers, RankedWorker};
use crate::engine::presence::OnlinePolicy;
use crate::engine::{profile_for, read, write};
use crate::error::AppError;
use crate::models::profile::{Availability, Profile, Role};
use crate::models::report::{Report, ReportStatus};
use crate::models::task::{Task, TaskDraft};
use crate::models::worker::{Coordinate, Worker};
use crate::session::Session;
use crate::state::AppState;

/// Cache of located, available municipality workers.
pub struct WorkerDirectory {
    workers: RwLock<Vec<Worker>>,
    policy: OnlinePolicy,
}

impl WorkerDirectory {
    pub fn new(policy: OnlinePolicy) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub async fn refresh(&self, store: &dyn Store) -> Result<usize, AppError> {
        let query = Query::new()
            .eq("role", Role::Municipality)
            .eq("availability_status", Availability::Available)
            .not_null("current_location_lat")
            .not_null("current_location_lng")
            .order("full_name", true);
        let profiles = fetch::<Profile>(store, &query).await?;

        let now = Utc::now();
        let workers: Vec<Worker> = profiles
            .into_iter()
            .map(|profile| {
                let online = self.policy.is_online(profile.last_location_update, now);
                Worker::from_profile(profile, online)
            })
            .collect();

        let count = workers.len();
        *write(&self.workers) = workers;
        Ok(count)
    }

    /// Cached workers with the online flag evaluated at `now`.
    pub fn workers(&self, now: DateTime<Utc>) -> Vec<Worker> {
        read(&self.workers)
            .iter()
            .cloned()
            .map(|mut worker| {
                worker.is_online = self.policy.is_online(worker.last_location_update, now);
                worker
            })
            .collect()
    }

    pub fn closest(&self, target: &Coordinate, now: DateTime<Utc>) -> Option<Worker> {
        find_closest_worker(target, &self.workers(now)).cloned()
    }

    pub fn rank(
        &self,
        target: Option<&Coordinate>,
        search: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<RankedWorker> {
        rank_workers(target, &self.workers(now), search)
    }

    pub fn online_count(&self, now: DateTime<Utc>) -> usize {
        self.workers(now).iter().filter(|worker| worker.is_online).count()
    }
}

/// Keeps the worker directory current: on a fixed interval and whenever a
/// profile changes.
pub async fn run_worker_refresh(state: Arc<AppState>, every: Duration) {
    info!(interval_secs = every.as_secs(), "worker refresh started");
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = state.worker_refresh.notified() => {},
        }

        match state.workers.refresh(state.store.as_ref()).await {
            Ok(count) => {
                let online = state.workers.online_count(Utc::now());
                state.metrics.online_workers.set(online as i64);
                debug!(workers = count, online, "worker directory refreshed");
            }
            Err(err) => warn!(error = %err, "worker refresh failed"),
        }
    }
}

/// Creates a task for `report_id`, hands it to `worker_id` and notifies the
/// worker.
pub async fn assign_worker(
    state: &AppState,
    session: &Session,
    worker_id: Uuid,
    report_id: Uuid,
) -> Result<Task, AppError> {
    session.require(Role::Government, "assign workers")?;

    let start = Instant::now();
    let result = assign(state, session, worker_id, report_id).await;
    let outcome = if result.is_ok() { "success" } else { "error" };

    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome])
        .inc();

    if let Err(err) = &result {
        error!(error = %err, report_id = %report_id, worker_id = %worker_id, "assignment failed");
    }
    result
}

async fn assign(
    state: &AppState,
    session: &Session,
    worker_id: Uuid,
    report_id: Uuid,
) -> Result<Task, AppError> {
    let store = state.store.as_ref();
    let report = fetch_one::<Report>(store, report_id).await?;

    let worker = profile_for(store, worker_id).await?;
    if worker.role != Role::Municipality {
        return Err(AppError::BadRequest(format!(
            "user {worker_id} is not a municipality worker"
        )));
    }

    // A report is handed out once: only verified reports take an assignee.
    if state.strict_transitions && report.status != ReportStatus::Verified {
        let reason = match report.status {
            ReportStatus::Assigned | ReportStatus::InProgress => "it is already assigned",
            ReportStatus::Pending => "verify it first",
            _ => "it is closed",
        };
        return Err(AppError::Conflict(format!(
            "report is {} and cannot be assigned; {reason}",
            report.status.as_str()
        )));
    }

    let task = insert_task(
        state,
        session,
        TaskDraft {
            report_id,
            assigned_to: worker_id,
            notes: report.description.clone(),
            address: report.address.clone(),
            location: report.coordinate(),
            estimated_completion: None,
        },
    )
    .await?;

    let assigned = update::<Report>(
        store,
        report_id,
        json!({
            "status": ReportStatus::Assigned,
            "assigned_to": worker_id,
        }),
    )
    .await;
    if let Err(err) = assigned {
        // The task must not outlive a report that never moved to assigned.
        if let Err(cleanup) = store.delete(Table::Tasks, task.id).await {
            error!(error = %cleanup, task_id = %task.id, "failed to remove task after report update failed");
        }
        return Err(err.into());
    }

    notify_worker(
        store,
        worker_id,
        "task_assigned",
        "New Task Assigned",
        format!("You have been assigned to: {}", report.title),
        json!({
            "taskId": task.id,
            "reportId": report_id,
            "address": report.address,
        }),
    )
    .await;

    info!(
        task_id = %task.id,
        report_id = %report_id,
        worker_id = %worker_id,
        worker = worker.display_name(),
        "worker assigned"
    );

    Ok(task)
}

/// Assigns the nearest online, available worker to a located report.
pub async fn auto_assign(
    state: &AppState,
    session: &Session,
    report_id: Uuid,
) -> Result<Task, AppError> {
    session.require(Role::Government, "assign workers")?;

    let report = fetch_one::<Report>(state.store.as_ref(), report_id).await?;
    let target = report.coordinate().ok_or_else(|| {
        AppError::BadRequest("location coordinates are required for auto-assignment".to_string())
    })?;

    state.workers.refresh(state.store.as_ref()).await?;
    let worker = state
        .workers
        .closest(&target, Utc::now())
        .ok_or(AppError::NoAvailableWorkers)?;

    debug!(report_id = %report_id, worker_id = %worker.user_id, "closest worker selected");
    assign_worker(state, session, worker.user_id, report_id).await
}

/// Notification failures are logged and never fail the caller.
async fn notify_worker(
    store: &dyn Store,
    user_id: Uuid,
    kind: &str,
    title: &str,
    message: String,
    data: Value,
) {
    let row = json!({
        "user_id": user_id,
        "type": kind,
        "title": title,
        "message": message,
        "data": data,
        "read": false,
    });

    if let Err(err) = store.insert(Table::Notifications, row).await {
        warn!(error = %err, user_id = %user_id, "failed to create notification");
    }
}
