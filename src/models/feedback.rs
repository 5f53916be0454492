use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Record, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub report_id: Uuid,
    pub user_id: Uuid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for Feedback {
    const TABLE: Table = Table::Feedback;

    fn id(&self) -> Uuid {
        self.id
    }
}
