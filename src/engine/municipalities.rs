use std::sync::RwLock;

use tracing::{debug, info};

use crate::backend::{fetch, Query, Store};
use crate::engine::address::match_municipality;
use crate::engine::{read, write};
use crate::error::AppError;
use crate::models::municipality::Municipality;
use crate::models::profile::{Profile, Role};

/// Cached list of municipalities used for address matching.
#[derive(Default)]
pub struct MunicipalityDirectory {
    municipalities: RwLock<Vec<Municipality>>,
}

impl MunicipalityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All municipality profiles ordered by name, offline until presence
    /// says otherwise.
    pub async fn fetch(&self, store: &dyn Store) -> Result<Vec<Municipality>, AppError> {
        let query = Query::new()
            .eq("role", Role::Municipality)
            .order("full_name", true);
        let municipalities: Vec<Municipality> = fetch::<Profile>(store, &query)
            .await?
            .into_iter()
            .map(Municipality::from_profile)
            .collect();

        debug!(count = municipalities.len(), "municipalities fetched");
        *write(&self.municipalities) = municipalities.clone();
        Ok(municipalities)
    }

    pub fn cached(&self) -> Vec<Municipality> {
        read(&self.municipalities).clone()
    }

    /// Heuristic match for `address`; fetches first when nothing is cached.
    pub async fn best_match(
        &self,
        store: &dyn Store,
        address: &str,
    ) -> Result<Option<Municipality>, AppError> {
        if address.trim().is_empty() {
            return Ok(None);
        }

        let cache_empty = read(&self.municipalities).is_empty();
        let municipalities = if cache_empty {
            self.fetch(store).await?
        } else {
            self.cached()
        };

        let matched = match_municipality(address, &municipalities).cloned();
        match &matched {
            Some(municipality) => {
                info!(user_id = %municipality.user_id, address, "address matched to municipality")
            }
            None => debug!(address, "no municipality matched address"),
        }

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use super::MunicipalityDirectory;
    use crate::backend::memory::{MemoryFeed, MemoryStore};
    use crate::backend::{Store, Table};

    #[tokio::test]
    async fn fetches_lazily_and_matches() {
        let store = MemoryStore::new(Arc::new(MemoryFeed::new()));
        for (name, address) in [("Uptown Ward", "Uptown Municipal Office"), ("Downtown Ward", "Downtown Municipal Office")] {
            store
                .insert(
                    Table::Profiles,
                    json!({
                        "user_id": Uuid::new_v4(),
                        "full_name": name,
                        "email": "ward@city.test",
                        "role": "municipality",
                        "address": address,
                    }),
                )
                .await
                .unwrap();
        }

        let directory = MunicipalityDirectory::new();
        assert!(directory.cached().is_empty());

        let matched = directory
            .best_match(&store, "123 Oak Avenue, Downtown")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.full_name, "Downtown Ward");
        assert_eq!(directory.cached().len(), 2);

        assert!(directory.best_match(&store, "  ").await.unwrap().is_none());
    }
}
