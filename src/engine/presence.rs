use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{fetch, Presence, PresenceEvent, Query, Store, SubscriptionId};
use crate::engine::{read, write};
use crate::error::AppError;
use crate::models::municipality::Municipality;
use crate::models::profile::{Profile, Role};
use crate::session::Session;

pub const MUNICIPALITY_CHANNEL: &str = "municipality_presence";

/// The one rule for deriving an online flag from a last-seen timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlinePolicy {
    window: Duration,
}

impl OnlinePolicy {
    pub const DEFAULT_WINDOW_SECS: i64 = 300;

    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::new(Duration::seconds(secs))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_online(&self, last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        last_seen.is_some_and(|seen| now.signed_duration_since(seen) < self.window)
    }
}

impl Default for OnlinePolicy {
    fn default() -> Self {
        Self::from_secs(Self::DEFAULT_WINDOW_SECS)
    }
}

#[derive(Debug, Default)]
struct Roster {
    members: Vec<Municipality>,
    present: HashSet<Uuid>,
}

impl Roster {
    fn apply(&mut self, event: &PresenceEvent, now: DateTime<Utc>) {
        match event {
            PresenceEvent::Sync { members } => {
                self.present = members.iter().copied().collect();
                for member in &mut self.members {
                    if self.present.contains(&member.user_id) {
                        member.last_seen = Some(now);
                    }
                }
            }
            PresenceEvent::Join { key, .. } => {
                self.present.insert(*key);
                if let Some(member) = self.members.iter_mut().find(|m| m.user_id == *key) {
                    member.last_seen = Some(now);
                }
            }
            PresenceEvent::Leave { key } => {
                self.present.remove(key);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub municipalities: Vec<Municipality>,
    pub online_count: usize,
    pub total_count: usize,
}

/// Follows the municipality presence channel and keeps each municipality's
/// online flag and last-seen time.
pub struct PresenceTracker {
    roster: Arc<RwLock<Roster>>,
    policy: OnlinePolicy,
    presence: Arc<dyn Presence>,
    subscription: SubscriptionId,
}

impl PresenceTracker {
    pub fn new(presence: Arc<dyn Presence>, policy: OnlinePolicy) -> Self {
        let roster = Arc::new(RwLock::new(Roster::default()));
        let sink = roster.clone();
        let subscription = presence.subscribe(
            MUNICIPALITY_CHANNEL,
            Arc::new(move |event: &PresenceEvent| {
                debug!(?event, "presence event");
                write(&sink).apply(event, Utc::now());
            }),
        );

        Self {
            roster,
            policy,
            presence,
            subscription,
        }
    }

    /// Reloads municipality profiles, keeping last-seen times of known ones.
    pub async fn reload(&self, store: &dyn Store) -> Result<usize, AppError> {
        let query = Query::new()
            .eq("role", Role::Municipality)
            .order("full_name", true);
        let profiles = fetch::<Profile>(store, &query).await?;

        let now = Utc::now();
        let mut roster = write(&self.roster);
        let previous: HashMap<Uuid, Option<DateTime<Utc>>> = roster
            .members
            .iter()
            .map(|member| (member.user_id, member.last_seen))
            .collect();

        let members = profiles
            .into_iter()
            .map(|profile| {
                let mut municipality = Municipality::from_profile(profile);
                let known = previous.get(&municipality.user_id).copied().flatten();
                // Members that joined before they were loaded count from now.
                municipality.last_seen = known.or_else(|| {
                    roster
                        .present
                        .contains(&municipality.user_id)
                        .then_some(now)
                });
                municipality
            })
            .collect();
        roster.members = members;

        Ok(roster.members.len())
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PresenceSnapshot {
        let roster = read(&self.roster);
        let municipalities: Vec<Municipality> = roster
            .members
            .iter()
            .map(|member| {
                let mut member = member.clone();
                // Channel membership is the heartbeat: a present member was seen now.
                if roster.present.contains(&member.user_id) {
                    member.last_seen = Some(now);
                }
                member.is_online = roster.present.contains(&member.user_id)
                    && self.policy.is_online(member.last_seen, now);
                member
            })
            .collect();

        let online_count = municipalities.iter().filter(|m| m.is_online).count();
        let total_count = municipalities.len();

        PresenceSnapshot {
            municipalities,
            online_count,
            total_count,
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.presence.unsubscribe(self.subscription);
    }
}

/// Declares a municipality user online. Repeated calls refresh last-seen.
pub fn announce(presence: &dyn Presence, session: &Session) -> Result<(), AppError> {
    session.require(Role::Municipality, "announce presence")?;

    presence.track(
        MUNICIPALITY_CHANNEL,
        session.user_id,
        json!({
            "user_id": session.user_id,
            "online_at": Utc::now(),
        }),
    );
    info!(user_id = %session.user_id, "municipality announced online");
    Ok(())
}

pub fn depart(presence: &dyn Presence, session: &Session) {
    presence.untrack(MUNICIPALITY_CHANNEL, session.user_id);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use super::{announce, depart, OnlinePolicy, PresenceTracker};
    use crate::backend::memory::{MemoryFeed, MemoryPresence, MemoryStore};
    use crate::backend::{Presence, Store, Table};
    use crate::models::profile::Role;
    use crate::session::Session;

    #[test]
    fn online_within_window_only() {
        let policy = OnlinePolicy::default();
        let now = Utc::now();

        assert!(policy.is_online(Some(now - Duration::minutes(4)), now));
        assert!(!policy.is_online(Some(now - Duration::minutes(5)), now));
        assert!(!policy.is_online(None, now));
    }

    async fn municipality(store: &MemoryStore, name: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        store
            .insert(
                Table::Profiles,
                json!({
                    "user_id": user_id,
                    "full_name": name,
                    "email": format!("{}@city.test", name.to_lowercase()),
                    "role": "municipality",
                }),
            )
            .await
            .unwrap();
        user_id
    }

    #[tokio::test]
    async fn tracks_join_and_leave_of_municipalities() {
        let store = MemoryStore::new(Arc::new(MemoryFeed::new()));
        let north = municipality(&store, "North").await;
        let south = municipality(&store, "South").await;

        let presence = Arc::new(MemoryPresence::new());
        let tracker = PresenceTracker::new(presence.clone(), OnlinePolicy::default());
        assert_eq!(tracker.reload(&store).await.unwrap(), 2);

        let session = Session::new(north, Role::Municipality);
        announce(presence.as_ref(), &session).unwrap();

        let snapshot = tracker.snapshot(Utc::now());
        assert_eq!(snapshot.total_count, 2);
        assert_eq!(snapshot.online_count, 1);
        let north_entry = snapshot
            .municipalities
            .iter()
            .find(|m| m.user_id == north)
            .unwrap();
        assert!(north_entry.is_online);
        assert!(north_entry.last_seen.is_some());
        assert!(!snapshot.municipalities.iter().find(|m| m.user_id == south).unwrap().is_online);

        depart(presence.as_ref(), &session);
        let snapshot = tracker.snapshot(Utc::now());
        assert_eq!(snapshot.online_count, 0);
        assert!(presence.members(super::MUNICIPALITY_CHANNEL).is_empty());
    }

    #[tokio::test]
    async fn departed_municipalities_go_offline() {
        let store = MemoryStore::new(Arc::new(MemoryFeed::new()));
        let north = municipality(&store, "North").await;
        let presence = Arc::new(MemoryPresence::new());
        let tracker = PresenceTracker::new(presence.clone(), OnlinePolicy::default());
        tracker.reload(&store).await.unwrap();

        let session = Session::new(north, Role::Municipality);
        announce(presence.as_ref(), &session).unwrap();
        depart(presence.as_ref(), &session);

        let later = Utc::now() + Duration::minutes(6);
        let snapshot = tracker.snapshot(later);
        assert_eq!(snapshot.online_count, 0);
        assert!(snapshot.municipalities[0].last_seen.unwrap() < later - Duration::minutes(5));
    }

    #[tokio::test]
    async fn present_municipalities_stay_online() {
        let store = MemoryStore::new(Arc::new(MemoryFeed::new()));
        let north = municipality(&store, "North").await;
        let presence = Arc::new(MemoryPresence::new());
        let tracker = PresenceTracker::new(presence.clone(), OnlinePolicy::default());
        tracker.reload(&store).await.unwrap();

        announce(presence.as_ref(), &Session::new(north, Role::Municipality)).unwrap();

        let later = Utc::now() + Duration::minutes(30);
        let snapshot = tracker.snapshot(later);
        assert_eq!(snapshot.online_count, 1);
        assert_eq!(snapshot.municipalities[0].last_seen, Some(later));
    }

    #[tokio::test]
    async fn members_present_before_reload_are_online() {
        let store = MemoryStore::new(Arc::new(MemoryFeed::new()));
        let north = municipality(&store, "North").await;
        let presence = Arc::new(MemoryPresence::new());
        let tracker = PresenceTracker::new(presence.clone(), OnlinePolicy::default());

        announce(presence.as_ref(), &Session::new(north, Role::Municipality)).unwrap();
        tracker.reload(&store).await.unwrap();

        assert_eq!(tracker.snapshot(Utc::now()).online_count, 1);
    }

    #[test]
    fn only_municipality_users_announce() {
        let presence = MemoryPresence::new();
        let citizen = Session::new(Uuid::new_v4(), Role::Citizen);
        assert!(announce(&presence, &citizen).is_err());
    }
}
