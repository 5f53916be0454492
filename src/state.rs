use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

use crate::backend::geocode::{MockGeocoder, NominatimGeocoder};
use crate::backend::memory::{MemoryFeed, MemoryObjectStorage, MemoryPresence, MemoryStore};
use crate::backend::{
    ChangeEvent, ChangeFeed, ObjectStorage, Presence, ReverseGeocoder, Store, Subscription, Table,
};
use crate::config::Config;
use crate::engine::municipalities::MunicipalityDirectory;
use crate::engine::presence::{OnlinePolicy, PresenceTracker};
use crate::engine::workers::WorkerDirectory;
use crate::error::AppError;
use crate::observability::metrics::Metrics;

/// The hosted collaborators the service runs against.
pub struct Backends {
    pub store: Arc<dyn Store>,
    pub feed: Arc<dyn ChangeFeed>,
    pub presence: Arc<dyn Presence>,
    pub storage: Arc<dyn ObjectStorage>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
}

impl Backends {
    /// Everything in-process, with the mock geocoder.
    pub fn in_memory(config: &Config) -> Self {
        let feed = Arc::new(MemoryFeed::new());
        Self {
            store: Arc::new(MemoryStore::new(Arc::clone(&feed))),
            feed,
            presence: Arc::new(MemoryPresence::new()),
            storage: Arc::new(MemoryObjectStorage::new(config.storage_public_url.clone())),
            geocoder: Arc::new(MockGeocoder),
        }
    }
}

const WATCHED_TABLES: [Table; 7] = [
    Table::Reports,
    Table::Tasks,
    Table::Profiles,
    Table::JobListings,
    Table::JobApplications,
    Table::Notifications,
    Table::Feedback,
];

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub feed: Arc<dyn ChangeFeed>,
    pub presence: Arc<dyn Presence>,
    pub storage: Arc<dyn ObjectStorage>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub workers: WorkerDirectory,
    pub municipalities: MunicipalityDirectory,
    pub presence_tracker: PresenceTracker,
    pub metrics: Metrics,
    pub policy: OnlinePolicy,
    pub strict_transitions: bool,
    pub geolocation_timeout: Duration,
    pub event_buffer_size: usize,
    /// Signalled on profile changes so the worker directory refreshes early.
    pub worker_refresh: Arc<Notify>,
    _subscriptions: Vec<Subscription>,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Self {
        let policy = OnlinePolicy::from_secs(config.worker_freshness_secs);
        let metrics = Metrics::new();
        let worker_refresh = Arc::new(Notify::new());

        let subscriptions = WATCHED_TABLES
            .into_iter()
            .map(|table| {
                let metrics = metrics.clone();
                let worker_refresh = Arc::clone(&worker_refresh);
                Subscription::new(
                    Arc::clone(&backends.feed),
                    table,
                    Arc::new(move |event: &ChangeEvent| {
                        metrics
                            .change_events_total
                            .with_label_values(&[event.table.as_str(), event.kind.as_str()])
                            .inc();
                        if event.table == Table::Profiles {
                            worker_refresh.notify_one();
                        }
                    }),
                )
            })
            .collect();

        Self {
            presence_tracker: PresenceTracker::new(Arc::clone(&backends.presence), policy),
            store: backends.store,
            feed: backends.feed,
            presence: backends.presence,
            storage: backends.storage,
            geocoder: backends.geocoder,
            workers: WorkerDirectory::new(policy),
            municipalities: MunicipalityDirectory::new(),
            metrics,
            policy,
            strict_transitions: config.strict_transitions,
            geolocation_timeout: Duration::from_millis(config.geolocation_timeout_ms),
            event_buffer_size: config.event_buffer_size,
            worker_refresh,
            _subscriptions: subscriptions,
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        Self::new(config, Backends::in_memory(config))
    }

    /// In-memory collaborators, plus a network geocoder when one is
    /// configured.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let mut backends = Backends::in_memory(config);

        if let Some(url) = &config.geocoder_url {
            let geocoder = NominatimGeocoder::new(
                url.clone(),
                Duration::from_millis(config.geolocation_timeout_ms),
            )?;
            backends.geocoder = Arc::new(geocoder);
            info!(geocoder_url = %url, "reverse geocoding via remote endpoint");
        }

        Ok(Self::new(config, backends))
    }
}
