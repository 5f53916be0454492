use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Record, Table};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Municipality,
    Government,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Submitted,
    UnderReview,
    InterviewScheduled,
    Selected,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub requirements: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub job_type: JobType,
    pub salary_range: Option<String>,
    pub posted_by: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for JobListing {
    const TABLE: Table = Table::JobListings;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    pub requirements: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub job_type: JobType,
    pub salary_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobApplication {
    pub id: Uuid,
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub resume_url: Option<String>,
    pub cover_letter: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub status: ApplicationStatus,
    pub interview_date: Option<DateTime<Utc>>,
    pub interview_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for JobApplication {
    const TABLE: Table = Table::JobApplications;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationDraft {
    pub resume_url: Option<String>,
    pub cover_letter: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub title: String,
    pub department: Option<String>,
    pub job_type: JobType,
    pub location: Option<String>,
}

impl From<&JobListing> for JobSummary {
    fn from(job: &JobListing) -> Self {
        Self {
            title: job.title.clone(),
            department: job.department.clone(),
            job_type: job.job_type,
            location: job.location.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicantSummary {
    pub full_name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
}

/// An application joined with its listing and applicant.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    #[serde(flatten)]
    pub application: JobApplication,
    pub job: Option<JobSummary>,
    pub applicant: Option<ApplicantSummary>,
}
