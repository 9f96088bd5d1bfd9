use crate::{error::AppError, models::package::TripPackage, services::storage::StorageService};

pub fn package_key(id: &str) -> String {
    format!("package-{id}")
}

/// Standalone packages addressed by id, e.g. one picked for review before
/// booking.
#[derive(Clone)]
pub struct PackageStore {
    storage: StorageService,
}

impl PackageStore {
    pub fn new(storage: StorageService) -> Self {
        Self { storage }
    }

    /// Missing and unreadable records both come back as `None`.
    pub async fn get_package(&self, user_id: &str, id: &str) -> Option<TripPackage> {
        self.storage
            .load_or_default::<Option<TripPackage>>(user_id, &package_key(id))
            .await
    }

    pub async fn save_package(&self, user_id: &str, id: &str, package: &TripPackage) -> Result<(), AppError> {
        if id.trim().is_empty() {
            return Err(AppError::BadRequest("package id must not be empty".into()));
        }
        self.storage.write_json(user_id, &package_key(id), package).await
    }

    pub async fn delete_package(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        self.storage.remove(user_id, &package_key(id)).await
    }
}
