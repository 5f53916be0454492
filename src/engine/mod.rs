pub mod address;
pub mod jobs;
pub mod location;
pub mod media;
pub mod municipalities;
pub mod presence;
pub mod reports;
pub mod selector;
pub mod workers;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::backend::{fetch, Query, Store};
use crate::error::AppError;
use crate::models::profile::Profile;

/// The profile row owned by `user_id`.
pub async fn profile_for(store: &dyn Store, user_id: Uuid) -> Result<Profile, AppError> {
    fetch::<Profile>(store, &Query::new().eq("user_id", user_id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("profile for user {user_id} not found")))
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
