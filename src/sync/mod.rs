//! Per-session caches of reports and tasks, kept current by the change feed.
//!
//! Collections are fetched newest first, then patched in arrival order:
//! inserts are prepended, updates replace by id and deletes remove by id.
//! Nothing is re-sorted afterwards, so out-of-order inserts can leave the
//! list only approximately ordered by creation time. `refetch` restores the
//! exact order.

use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{
    decode, fetch, ChangeEvent, ChangeFeed, ChangeKind, Query, Record, Store, Subscription, Table,
};
use crate::engine::{read, write};
use crate::error::AppError;
use crate::models::profile::Role;
use crate::models::report::Report;
use crate::models::task::Task;
use crate::session::Session;

/// Which rows of a table a session may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    All,
    ColumnEq { column: &'static str, value: Uuid },
}

impl RowFilter {
    pub fn query(&self) -> Query {
        match self {
            RowFilter::All => Query::new(),
            RowFilter::ColumnEq { column, value } => Query::new().eq(column, value),
        }
    }

    pub fn admits(&self, row: &Value) -> bool {
        self.query().matches(row)
    }
}

/// Role-based visibility; `None` means the table is not synced at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncScope {
    pub reports: Option<RowFilter>,
    pub tasks: Option<RowFilter>,
}

impl SyncScope {
    pub fn for_session(session: &Session) -> Self {
        match session.role {
            Role::Citizen => Self {
                reports: Some(RowFilter::ColumnEq {
                    column: "reporter_id",
                    value: session.user_id,
                }),
                tasks: None,
            },
            Role::Municipality => Self {
                reports: Some(RowFilter::All),
                tasks: Some(RowFilter::ColumnEq {
                    column: "assigned_to",
                    value: session.user_id,
                }),
            },
            Role::Government => Self {
                reports: Some(RowFilter::All),
                tasks: Some(RowFilter::All),
            },
        }
    }
}

struct Collections {
    scope: SyncScope,
    reports: RwLock<Vec<Report>>,
    tasks: RwLock<Vec<Task>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Collections {
    fn apply(&self, event: &ChangeEvent) {
        let outcome = match event.table {
            Table::Reports => self
                .scope
                .reports
                .map(|filter| apply_change(&mut *write(&self.reports), &filter, event)),
            Table::Tasks => self
                .scope
                .tasks
                .map(|filter| apply_change(&mut *write(&self.tasks), &filter, event)),
            _ => None,
        };

        let forwarded = match outcome {
            Some(Outcome::Applied) => event.clone(),
            // The row left this session's view; only its id goes out.
            Some(Outcome::Removed(id)) => ChangeEvent {
                table: event.table,
                kind: ChangeKind::Delete,
                new: None,
                old: Some(json!({ "id": id })),
                commit_timestamp: event.commit_timestamp,
            },
            Some(Outcome::Ignored) | None => return,
        };

        // No receivers is normal between websocket sessions.
        let _ = self.changes.send(forwarded);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    /// An update moved the record out of scope.
    Removed(Uuid),
    Ignored,
}

/// Applies one change to a cached collection.
fn apply_change<T: Record>(items: &mut Vec<T>, filter: &RowFilter, event: &ChangeEvent) -> Outcome {
    match event.kind {
        ChangeKind::Insert => {
            let Some(row) = event.new.as_ref().filter(|row| filter.admits(row)) else {
                return Outcome::Ignored;
            };
            let Some(record) = decode_row::<T>(row) else {
                return Outcome::Ignored;
            };

            // Redelivered inserts replace in place.
            match items.iter().position(|item| item.id() == record.id()) {
                Some(index) => items[index] = record,
                None => items.insert(0, record),
            }
            Outcome::Applied
        }
        ChangeKind::Update => {
            let Some(row) = event.new.as_ref() else {
                return Outcome::Ignored;
            };
            let Some(record) = decode_row::<T>(row) else {
                return Outcome::Ignored;
            };
            let Some(index) = items.iter().position(|item| item.id() == record.id()) else {
                return Outcome::Ignored;
            };

            if filter.admits(row) {
                items[index] = record;
                Outcome::Applied
            } else {
                items.remove(index);
                Outcome::Removed(record.id())
            }
        }
        ChangeKind::Delete => {
            let Some(id) = event.record_id() else {
                warn!(table = %T::TABLE, "delete event without an id");
                return Outcome::Ignored;
            };
            let before = items.len();
            items.retain(|item| item.id() != id);
            if items.len() == before {
                Outcome::Ignored
            } else {
                Outcome::Applied
            }
        }
    }
}

fn decode_row<T: Record>(row: &Value) -> Option<T> {
    decode::<T>(row.clone())
        .inspect_err(|err| warn!(error = %err, "dropping undecodable change"))
        .ok()
}

/// Live reports and tasks for one session. Dropping it ends the feed
/// subscriptions.
pub struct LiveState {
    session: Session,
    collections: Arc<Collections>,
    _subscriptions: Vec<Subscription>,
}

impl LiveState {
    /// Fetches each visible collection, then subscribes to its table.
    pub async fn start(
        session: Session,
        store: &dyn Store,
        feed: Arc<dyn ChangeFeed>,
        event_buffer: usize,
    ) -> Result<Self, AppError> {
        let scope = SyncScope::for_session(&session);
        let (changes, _) = broadcast::channel(event_buffer.max(1));

        let collections = Arc::new(Collections {
            scope,
            reports: RwLock::new(Vec::new()),
            tasks: RwLock::new(Vec::new()),
            changes,
        });
        refetch_into(&collections, store).await?;

        let tables = [
            (Table::Reports, scope.reports.is_some()),
            (Table::Tasks, scope.tasks.is_some()),
        ];
        let subscriptions = tables
            .into_iter()
            .filter(|(_, synced)| *synced)
            .map(|(table, _)| {
                let collections = Arc::clone(&collections);
                Subscription::new(
                    Arc::clone(&feed),
                    table,
                    Arc::new(move |event: &ChangeEvent| collections.apply(event)),
                )
            })
            .collect();

        debug!(
            user_id = %session.user_id,
            role = session.role.as_str(),
            reports = read(&collections.reports).len(),
            tasks = read(&collections.tasks).len(),
            "live state started"
        );

        Ok(Self {
            session,
            collections,
            _subscriptions: subscriptions,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn scope(&self) -> SyncScope {
        self.collections.scope
    }

    /// Replaces both collections with a fresh newest-first fetch.
    pub async fn refetch(&self, store: &dyn Store) -> Result<(), AppError> {
        refetch_into(&self.collections, store).await
    }

    pub fn reports(&self) -> Vec<Report> {
        read(&self.collections.reports).clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        read(&self.collections.tasks).clone()
    }

    /// Applies an event directly, as the feed would.
    pub fn apply(&self, event: &ChangeEvent) {
        self.collections.apply(event);
    }

    /// Events that changed this session's collections, after they were
    /// applied.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.collections.changes.subscribe()
    }
}

async fn refetch_into(collections: &Collections, store: &dyn Store) -> Result<(), AppError> {
    let scope = collections.scope;

    let reports = match scope.reports {
        Some(filter) => fetch::<Report>(store, &filter.query().newest_first()).await?,
        None => Vec::new(),
    };
    let tasks = match scope.tasks {
        Some(filter) => fetch::<Task>(store, &filter.query().newest_first()).await?,
        None => Vec::new(),
    };

    *write(&collections.reports) = reports;
    *write(&collections.tasks) = tasks;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::{LiveState, RowFilter, SyncScope};
    use crate::backend::memory::{MemoryFeed, MemoryStore};
    use crate::backend::{ChangeEvent, ChangeKind, Store, Table};
    use crate::models::profile::Role;
    use crate::session::Session;

    fn report_row(reporter: Uuid, title: &str) -> Value {
        json!({
            "reporter_id": reporter,
            "title": title,
            "waste_type": "dry",
            "status": "pending",
        })
    }

    fn task_row(assignee: Uuid) -> Value {
        json!({
            "report_id": Uuid::new_v4(),
            "assigned_to": assignee,
            "assigned_by": Uuid::new_v4(),
            "status": "assigned",
        })
    }

    fn setup() -> (Arc<MemoryFeed>, MemoryStore) {
        let feed = Arc::new(MemoryFeed::new());
        let store = MemoryStore::new(Arc::clone(&feed));
        (feed, store)
    }

    #[test]
    fn scope_follows_role() {
        let user = Uuid::new_v4();

        let citizen = SyncScope::for_session(&Session::new(user, Role::Citizen));
        assert_eq!(
            citizen.reports,
            Some(RowFilter::ColumnEq {
                column: "reporter_id",
                value: user
            })
        );
        assert!(citizen.tasks.is_none());

        let worker = SyncScope::for_session(&Session::new(user, Role::Municipality));
        assert_eq!(worker.reports, Some(RowFilter::All));
        assert!(matches!(worker.tasks, Some(RowFilter::ColumnEq { column: "assigned_to", .. })));

        let official = SyncScope::for_session(&Session::new(user, Role::Government));
        assert_eq!(official.tasks, Some(RowFilter::All));
    }

    #[tokio::test]
    async fn initial_fetch_is_newest_first() {
        let (feed, store) = setup();
        let reporter = Uuid::new_v4();
        let mut older = report_row(reporter, "older");
        older["created_at"] = json!("2024-01-01T00:00:00Z");
        let mut newer = report_row(reporter, "newer");
        newer["created_at"] = json!("2024-06-01T00:00:00Z");
        store.insert(Table::Reports, older).await.unwrap();
        store.insert(Table::Reports, newer).await.unwrap();

        let session = Session::new(Uuid::new_v4(), Role::Government);
        let live = LiveState::start(session, &store, feed, 16).await.unwrap();

        let titles: Vec<String> = live.reports().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, ["newer", "older"]);
    }

    #[tokio::test]
    async fn insert_update_delete_follow_the_feed() {
        let (feed, store) = setup();
        let reporter = Uuid::new_v4();
        let existing = store
            .insert(Table::Reports, report_row(reporter, "first"))
            .await
            .unwrap();

        let session = Session::new(Uuid::new_v4(), Role::Government);
        let live = LiveState::start(session, &store, feed, 16).await.unwrap();
        assert_eq!(live.reports().len(), 1);

        let inserted = store
            .insert(Table::Reports, report_row(reporter, "second"))
            .await
            .unwrap();
        let reports = live.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].title, "second");

        let id: Uuid = existing["id"].as_str().unwrap().parse().unwrap();
        store
            .update(Table::Reports, id, json!({ "status": "verified" }))
            .await
            .unwrap();
        let reports = live.reports();
        assert_eq!(reports.len(), 2);
        let updated = reports.iter().find(|r| r.id == id).unwrap();
        assert_eq!(updated.status.as_str(), "verified");

        let inserted_id: Uuid = inserted["id"].as_str().unwrap().parse().unwrap();
        store.delete(Table::Reports, inserted_id).await.unwrap();
        let reports = live.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports.iter().all(|r| r.id != inserted_id));
    }

    #[tokio::test]
    async fn citizens_only_see_their_own_rows() {
        let (feed, store) = setup();
        let me = Uuid::new_v4();
        let live = LiveState::start(Session::new(me, Role::Citizen), &store, feed, 16)
            .await
            .unwrap();

        store
            .insert(Table::Reports, report_row(Uuid::new_v4(), "someone else"))
            .await
            .unwrap();
        store.insert(Table::Reports, report_row(me, "mine")).await.unwrap();
        store.insert(Table::Tasks, task_row(me)).await.unwrap();

        let reports = live.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].title, "mine");
        assert!(live.tasks().is_empty());
    }

    #[tokio::test]
    async fn reassigned_task_leaves_the_workers_list() {
        let (feed, store) = setup();
        let worker = Uuid::new_v4();
        let task = store.insert(Table::Tasks, task_row(worker)).await.unwrap();
        let live = LiveState::start(Session::new(worker, Role::Municipality), &store, feed, 16)
            .await
            .unwrap();
        assert_eq!(live.tasks().len(), 1);

        let id: Uuid = task["id"].as_str().unwrap().parse().unwrap();
        store
            .update(Table::Tasks, id, json!({ "assigned_to": Uuid::new_v4() }))
            .await
            .unwrap();
        assert!(live.tasks().is_empty());
    }

    #[tokio::test]
    async fn reassignment_reaches_the_old_worker_as_a_bare_delete() {
        let (feed, store) = setup();
        let worker = Uuid::new_v4();
        let task = store.insert(Table::Tasks, task_row(worker)).await.unwrap();
        let live = LiveState::start(Session::new(worker, Role::Municipality), &store, feed, 16)
            .await
            .unwrap();
        let mut changes = live.changes();

        let id: Uuid = task["id"].as_str().unwrap().parse().unwrap();
        store
            .update(Table::Tasks, id, json!({ "assigned_to": Uuid::new_v4(), "notes": "private" }))
            .await
            .unwrap();

        let event = changes.try_recv().unwrap();
        assert_eq!(event.table, Table::Tasks);
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.new.is_none());
        assert_eq!(event.old, Some(json!({ "id": id })));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn redelivered_insert_is_not_duplicated() {
        let (feed, store) = setup();
        let session = Session::new(Uuid::new_v4(), Role::Government);
        let live = LiveState::start(session, &store, feed, 16).await.unwrap();

        let row = store
            .insert(Table::Reports, report_row(Uuid::new_v4(), "once"))
            .await
            .unwrap();
        live.apply(&ChangeEvent {
            table: Table::Reports,
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
            commit_timestamp: Utc::now(),
        });

        assert_eq!(live.reports().len(), 1);
    }

    #[tokio::test]
    async fn applied_changes_are_broadcast() {
        let (feed, store) = setup();
        let session = Session::new(Uuid::new_v4(), Role::Government);
        let live = LiveState::start(session, &store, Arc::clone(&feed) as _, 16)
            .await
            .unwrap();
        let mut changes = live.changes();

        store
            .insert(Table::Reports, report_row(Uuid::new_v4(), "news"))
            .await
            .unwrap();
        let event = changes.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);

        let subscribers = feed.subscriber_count();
        drop(live);
        assert_eq!(feed.subscriber_count(), subscribers - 2);
    }
}
