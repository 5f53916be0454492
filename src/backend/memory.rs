use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    BackendError, ChangeEvent, ChangeFeed, ChangeHandler, ChangeKind, ObjectStorage, Presence,
    PresenceEvent, PresenceHandler, Query, Store, SubscriptionId, Table,
};

/// Synchronous fan-out of row changes to subscribers of a table.
#[derive(Default)]
pub struct MemoryFeed {
    handlers: DashMap<SubscriptionId, (Table, ChangeHandler)>,
    next_id: AtomicU64,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: ChangeEvent) {
        // Handlers are collected first so none runs while a shard is locked.
        let handlers: Vec<ChangeHandler> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == event.table)
            .map(|entry| entry.value().1.clone())
            .collect();

        debug!(
            table = %event.table,
            kind = event.kind.as_str(),
            subscribers = handlers.len(),
            "publishing change"
        );

        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl ChangeFeed for MemoryFeed {
    fn subscribe(&self, table: Table, handler: ChangeHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, (table, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.remove(&id);
    }
}

/// Table storage that publishes every successful write to a [`MemoryFeed`].
pub struct MemoryStore {
    tables: DashMap<Table, Vec<Value>>,
    feed: Arc<MemoryFeed>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new(feed: Arc<MemoryFeed>) -> Self {
        Self {
            tables: DashMap::new(),
            feed,
            unavailable: AtomicBool::new(false),
        }
    }

    /// While set, every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, |rows| rows.len())
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(BackendError::Unavailable("store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn emit(&self, table: Table, kind: ChangeKind, new: Option<Value>, old: Option<Value>) {
        self.feed.publish(ChangeEvent {
            table,
            kind,
            new,
            old,
            commit_timestamp: Utc::now(),
        });
    }
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id").and_then(Value::as_str).and_then(|raw| raw.parse().ok())
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.check_available()?;

        let mut rows: Vec<Value> = self
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();
        query.sort(&mut rows);

        Ok(rows)
    }

    async fn get(&self, table: Table, id: Uuid) -> Result<Option<Value>, BackendError> {
        self.check_available()?;

        Ok(self
            .tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id)).cloned()))
    }

    async fn insert(&self, table: Table, mut row: Value) -> Result<Value, BackendError> {
        self.check_available()?;

        let object = row
            .as_object_mut()
            .ok_or_else(|| BackendError::Rejected(format!("{table} row must be an object")))?;

        let now = json!(Utc::now());
        object
            .entry("id")
            .or_insert_with(|| json!(Uuid::new_v4()));
        object.entry("created_at").or_insert_with(|| now.clone());
        object.entry("updated_at").or_insert(now);

        let id = row_id(&row)
            .ok_or_else(|| BackendError::Rejected(format!("{table} row has an invalid id")))?;

        {
            let mut rows = self.tables.entry(table).or_default();
            if rows.iter().any(|existing| row_id(existing) == Some(id)) {
                return Err(BackendError::Rejected(format!(
                    "duplicate key: {table} record {id} already exists"
                )));
            }
            rows.push(row.clone());
        }

        self.emit(table, ChangeKind::Insert, Some(row.clone()), None);
        Ok(row)
    }

    async fn update(&self, table: Table, id: Uuid, patch: Value) -> Result<Value, BackendError> {
        self.check_available()?;

        let Value::Object(patch) = patch else {
            return Err(BackendError::Rejected(format!(
                "{table} update must be an object"
            )));
        };

        let (old, new) = {
            let mut rows = self.tables.entry(table).or_default();
            let row = rows
                .iter_mut()
                .find(|row| row_id(row) == Some(id))
                .ok_or(BackendError::NotFound { table, id })?;

            let old = row.clone();
            if let Some(object) = row.as_object_mut() {
                for (column, value) in patch {
                    if column != "id" {
                        object.insert(column, value);
                    }
                }
                object.insert("updated_at".to_string(), json!(Utc::now()));
            }
            (old, row.clone())
        };

        self.emit(table, ChangeKind::Update, Some(new.clone()), Some(old));
        Ok(new)
    }

    async fn delete(&self, table: Table, id: Uuid) -> Result<Value, BackendError> {
        self.check_available()?;

        let removed = {
            let mut rows = self.tables.entry(table).or_default();
            let position = rows
                .iter()
                .position(|row| row_id(row) == Some(id))
                .ok_or(BackendError::NotFound { table, id })?;
            rows.remove(position)
        };

        // Only the primary key is replicated for deletes.
        self.emit(table, ChangeKind::Delete, None, Some(json!({ "id": id })));
        Ok(removed)
    }
}

#[derive(Default)]
pub struct MemoryPresence {
    channels: DashMap<String, HashMap<Uuid, Value>>,
    handlers: DashMap<SubscriptionId, (String, PresenceHandler)>,
    next_id: AtomicU64,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    fn broadcast(&self, channel: &str, events: &[PresenceEvent]) {
        let handlers: Vec<PresenceHandler> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == channel)
            .map(|entry| entry.value().1.clone())
            .collect();

        for event in events {
            for handler in &handlers {
                handler(event);
            }
        }
    }
}

impl Presence for MemoryPresence {
    fn track(&self, channel: &str, key: Uuid, meta: Value) {
        let joined = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(key, meta.clone())
            .is_none();

        let sync = PresenceEvent::Sync {
            members: self.members(channel),
        };
        if joined {
            self.broadcast(channel, &[PresenceEvent::Join { key, meta }, sync]);
        } else {
            self.broadcast(channel, &[sync]);
        }
    }

    fn untrack(&self, channel: &str, key: Uuid) {
        let left = self
            .channels
            .get_mut(channel)
            .and_then(|mut members| members.remove(&key))
            .is_some();

        if left {
            let sync = PresenceEvent::Sync {
                members: self.members(channel),
            };
            self.broadcast(channel, &[PresenceEvent::Leave { key }, sync]);
        }
    }

    fn members(&self, channel: &str) -> Vec<Uuid> {
        let mut members: Vec<Uuid> = self
            .channels
            .get(channel)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn subscribe(&self, channel: &str, handler: PresenceHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .insert(id, (channel.to_string(), handler.clone()));

        handler(&PresenceEvent::Sync {
            members: self.members(channel),
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.remove(&id);
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub struct MemoryObjectStorage {
    public_base_url: String,
    objects: DashMap<(String, String), StoredObject>,
}

impl MemoryObjectStorage {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            objects: DashMap::new(),
        }
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let key = (bucket.to_string(), path.to_string());
        if self.objects.contains_key(&key) {
            return Err(BackendError::Rejected(format!(
                "object {bucket}/{path} already exists"
            )));
        }

        self.objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{bucket}/{path}", self.public_base_url)
    }
}
