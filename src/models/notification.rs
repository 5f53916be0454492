use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{Record, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Record for Notification {
    const TABLE: Table = Table::Notifications;

    fn id(&self) -> Uuid {
        self.id
    }
}
