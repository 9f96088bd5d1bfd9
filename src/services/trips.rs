use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::{
    error::AppError,
    models::trip::CompletedTrip,
    services::{drafts::LocalDraftStore, live::Snapshot, storage::StorageService},
};

pub const TRIPS_KEY: &str = "completed-trips";

#[derive(Clone)]
pub struct LocalTripStore {
    storage: StorageService,
}

impl LocalTripStore {
    pub fn new(storage: StorageService) -> Self {
        Self { storage }
    }

    pub async fn get_all_trips(&self, user_id: &str) -> Vec<CompletedTrip> {
        let mut trips: Vec<CompletedTrip> = self.storage.load_or_default(user_id, TRIPS_KEY).await;
        trips.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        trips
    }

    pub async fn get_trip(&self, user_id: &str, id: &str) -> Option<CompletedTrip> {
        self.get_all_trips(user_id)
            .await
            .into_iter()
            .find(|trip| trip.id == id)
    }

    pub async fn save_trip(&self, user_id: &str, mut trip: CompletedTrip) -> Result<CompletedTrip, AppError> {
        if trip.id.trim().is_empty() {
            return Err(AppError::BadRequest("trip id must not be empty".into()));
        }
        let now = Utc::now();
        if now > trip.updated_at {
            trip.updated_at = now;
        }
        self.update(user_id, |trips| {
            match trips.iter_mut().find(|existing| existing.id == trip.id) {
                Some(existing) => *existing = trip.clone(),
                None => trips.push(trip.clone()),
            }
            ((), true)
        })
        .await?;
        Ok(trip)
    }

    pub async fn delete_trip(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        self.update(user_id, |trips| {
            let before = trips.len();
            trips.retain(|trip| trip.id != id);
            ((), trips.len() != before)
        })
        .await
    }

    /// Renames in place. Unknown ids leave storage untouched and yield `None`.
    pub async fn update_trip_name(
        &self,
        user_id: &str,
        id: &str,
        new_name: &str,
    ) -> Result<Option<CompletedTrip>, AppError> {
        self.update(user_id, |trips| match trips.iter_mut().find(|trip| trip.id == id) {
            Some(trip) => {
                trip.name = new_name.to_string();
                (Some(trip.clone()), true)
            }
            None => (None, false),
        })
        .await
    }

    async fn update<R>(
        &self,
        user_id: &str,
        change: impl FnOnce(&mut Vec<CompletedTrip>) -> (R, bool),
    ) -> Result<R, AppError> {
        self.storage
            .update_json(user_id, TRIPS_KEY, |trips: &mut Vec<CompletedTrip>| {
                let (result, dirty) = change(trips);
                if dirty {
                    trips.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                }
                (result, dirty)
            })
            .await
    }

    /// Promotes a draft: the trip is stored first, then the draft is removed.
    pub async fn complete_draft(
        &self,
        drafts: &LocalDraftStore,
        user_id: &str,
        draft_id: &str,
        name: Option<String>,
    ) -> Result<CompletedTrip, AppError> {
        let draft = drafts
            .get_draft(user_id, draft_id)
            .await
            .ok_or(AppError::NotFound)?;
        let package = draft
            .package()
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
        let name = name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(draft.name);
        let trip = CompletedTrip::from_package(name, &package)
            .map_err(|err| AppError::BadRequest(err.to_string()))?;

        let trip = self.save_trip(user_id, trip).await?;
        drafts.delete_draft(user_id, draft_id).await?;
        info!(draft_id, trip_id = %trip.id, total = trip.budget.total, "draft promoted to trip");
        Ok(trip)
    }
}

#[async_trait]
impl Snapshot for LocalTripStore {
    type Item = CompletedTrip;

    async fn snapshot(&self, user_id: &str) -> Vec<CompletedTrip> {
        self.get_all_trips(user_id).await
    }
}
