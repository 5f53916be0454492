//! Contracts for the hosted collaborators the service delegates to:
//! relational storage, change feeds, presence channels, object storage and
//! geolocation. `memory` implements all of them in-process.

pub mod geocode;
pub mod memory;
pub mod query;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::worker::Coordinate;

pub use query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    #[serde(rename = "waste_reports")]
    Reports,
    Tasks,
    Profiles,
    JobListings,
    JobApplications,
    Notifications,
    Feedback,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Reports => "waste_reports",
            Table::Tasks => "tasks",
            Table::Profiles => "profiles",
            Table::JobListings => "job_listings",
            Table::JobApplications => "job_applications",
            Table::Notifications => "notifications",
            Table::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed row of one table.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    fn id(&self) -> Uuid;
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{table} record {id} not found")]
    NotFound { table: Table, id: Uuid },

    #[error("rejected by backend: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode {table} row: {message}")]
    Decode { table: Table, message: String },
}

pub fn decode<T: Record>(row: Value) -> Result<T, BackendError> {
    serde_json::from_value(row).map_err(|err| BackendError::Decode {
        table: T::TABLE,
        message: err.to_string(),
    })
}

pub fn decode_all<T: Record>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter().map(decode).collect()
}

/// Persistence collaborator. Rows are JSON objects keyed by `id`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Rows matching the query, in the query's order.
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, BackendError>;

    async fn get(&self, table: Table, id: Uuid) -> Result<Option<Value>, BackendError>;

    /// Fills `id`, `created_at` and `updated_at` when absent.
    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError>;

    /// Shallow merge of `patch` into the stored row.
    async fn update(&self, table: Table, id: Uuid, patch: Value) -> Result<Value, BackendError>;

    async fn delete(&self, table: Table, id: Uuid) -> Result<Value, BackendError>;
}

/// Typed helpers over any [`Store`].
pub async fn fetch<T: Record>(store: &dyn Store, query: &Query) -> Result<Vec<T>, BackendError> {
    decode_all(store.select(T::TABLE, query).await?)
}

pub async fn fetch_one<T: Record>(store: &dyn Store, id: Uuid) -> Result<T, BackendError> {
    match store.get(T::TABLE, id).await? {
        Some(row) => decode(row),
        None => Err(BackendError::NotFound {
            table: T::TABLE,
            id,
        }),
    }
}

pub async fn insert<T: Record>(store: &dyn Store, row: Value) -> Result<T, BackendError> {
    decode(store.insert(T::TABLE, row).await?)
}

pub async fn update<T: Record>(store: &dyn Store, id: Uuid, patch: Value) -> Result<T, BackendError> {
    decode(store.update(T::TABLE, id, patch).await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// One row change. Deletes may carry only the primary key in `old`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Identity of the affected row, from `new` or else `old`.
    pub fn record_id(&self) -> Option<Uuid> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .and_then(|row| row.get("id"))
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
    }
}

pub type SubscriptionId = u64;
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Change-feed collaborator: at-least-once delivery per change, no ordering
/// guarantee across rows.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, table: Table, handler: ChangeHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Unsubscribes when dropped.
pub struct Subscription {
    id: SubscriptionId,
    feed: Arc<dyn ChangeFeed>,
}

impl Subscription {
    pub fn new(feed: Arc<dyn ChangeFeed>, table: Table, handler: ChangeHandler) -> Self {
        let id = feed.subscribe(table, handler);
        Self { id, feed }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feed.unsubscribe(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresenceEvent {
    Sync { members: Vec<Uuid> },
    Join { key: Uuid, meta: Value },
    Leave { key: Uuid },
}

pub type PresenceHandler = Arc<dyn Fn(&PresenceEvent) + Send + Sync>;

/// Presence collaborator: transient membership of named channels.
pub trait Presence: Send + Sync {
    fn track(&self, channel: &str, key: Uuid, meta: Value);

    fn untrack(&self, channel: &str, key: Uuid);

    fn members(&self, channel: &str) -> Vec<Uuid>;

    /// Delivers an immediate `Sync` with the current members.
    fn subscribe(&self, channel: &str, handler: PresenceHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("geolocation is not supported")]
    Unsupported,

    #[error("location permission denied")]
    Denied,

    #[error("timed out waiting for a position")]
    Timeout,

    #[error("position unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<Coordinate, LocationError>;
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, point: Coordinate) -> Result<String, BackendError>;
}
