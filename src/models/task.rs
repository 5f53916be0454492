use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Record, Table};
use crate::models::worker::Coordinate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Assigned,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// assigned -> in_progress -> completed. An assigned task may also be
    /// completed directly.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        self == next
            || matches!(
                (self, next),
                (Assigned, InProgress) | (Assigned, Completed) | (InProgress, Completed)
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub report_id: Uuid,
    pub assigned_to: Uuid,
    pub assigned_by: Uuid,
    pub status: TaskStatus,
    pub notes: Option<String>,
    pub task_address: Option<String>,
    pub task_location_lat: Option<f64>,
    pub task_location_lng: Option<f64>,
    pub completion_photo_urls: Option<Vec<String>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub actual_completion: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.task_location_lat, self.task_location_lng)
    }
}

impl Record for Task {
    const TABLE: Table = Table::Tasks;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub report_id: Uuid,
    pub assigned_to: Uuid,
    pub notes: Option<String>,
    pub address: Option<String>,
    pub location: Option<Coordinate>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;

    #[test]
    fn tasks_only_move_forward() {
        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Assigned.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Assigned));
    }
}
