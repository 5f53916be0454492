use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Record, Table};
use crate::models::worker::Coordinate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WasteType {
    Dry,
    Wet,
    Hazardous,
    Electronic,
    Medical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Verified,
    Assigned,
    InProgress,
    Completed,
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Verified => "verified",
            ReportStatus::Assigned => "assigned",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Completed => "completed",
            ReportStatus::Rejected => "rejected",
        }
    }

    /// pending -> {verified, rejected} -> assigned -> in_progress -> completed.
    /// Rewriting the current status is always allowed.
    pub fn can_transition_to(self, next: ReportStatus) -> bool {
        use ReportStatus::*;

        self == next
            || matches!(
                (self, next),
                (Pending, Verified)
                    | (Pending, Rejected)
                    | (Verified, Assigned)
                    | (Assigned, InProgress)
                    | (InProgress, Completed)
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub waste_type: WasteType,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub address: Option<String>,
    pub status: ReportStatus,
    #[serde(default)]
    pub priority: ReportPriority,
    pub photo_urls: Option<Vec<String>>,
    pub verified_by: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.location_lat, self.location_lng)
    }
}

impl Record for Report {
    const TABLE: Table = Table::Reports;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportDraft {
    pub title: String,
    pub description: Option<String>,
    pub waste_type: WasteType,
    pub location: Option<Coordinate>,
    pub address: Option<String>,
    #[serde(default)]
    pub priority: ReportPriority,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::ReportStatus::*;

    #[test]
    fn documented_path_is_legal() {
        assert!(Pending.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Rejected));
    }

    #[test]
    fn skipping_or_reversing_is_illegal() {
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Verified));
        assert!(!Verified.can_transition_to(Rejected));
    }
}
