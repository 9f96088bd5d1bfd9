use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::Row;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::{db::DbPool, error::AppError};

/// Scope for records that are not owned by a single user.
pub const SHARED_SCOPE: &str = "shared";

const UPSERT: &str = r#"INSERT INTO local_storage (scope, key, value, updated_at) VALUES (?, ?, ?, ?)
   ON CONFLICT (scope, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#;

/// Persisted key-value area, one scope per user. Values are serialized
/// entity records.
///
/// Writers that read a record, change it and write it back go through
/// [`StorageService::update_json`] or hold [`StorageService::lock_scope`], so
/// two requests for the same scope never interleave.
#[derive(Clone)]
pub struct StorageService {
    db: DbPool,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl StorageService {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Exclusive access to every record of `scope` until the guard drops.
    pub async fn lock_scope(&self, scope: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(scope.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn read(&self, scope: &str, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM local_storage WHERE scope = ? AND key = ?")
            .bind(scope)
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    pub async fn write(&self, scope: &str, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(UPSERT)
            .bind(scope)
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Writes several records of one scope in a single transaction: either
    /// all of them land or none does.
    pub async fn write_all(&self, scope: &str, entries: &[(&str, String)]) -> Result<(), AppError> {
        let stamp = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;
        for (key, value) in entries {
            sqlx::query(UPSERT)
                .bind(scope)
                .bind(*key)
                .bind(value)
                .bind(&stamp)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove(&self, scope: &str, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM local_storage WHERE scope = ? AND key = ?")
            .bind(scope)
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
    ) -> Result<(), AppError> {
        let data = encode(value)?;
        self.write(scope, key, &data).await
    }

    pub async fn read_json<T: DeserializeOwned>(
        &self,
        scope: &str,
        key: &str,
    ) -> Result<Option<T>, AppError> {
        let Some(raw) = self.read(scope, key).await? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&raw).map_err(|err| AppError::Other(err.into()))?;
        Ok(Some(value))
    }

    /// Never fails: missing rows, storage errors and malformed records all
    /// read as the default value. Read paths only; writers use
    /// [`StorageService::load_for_update`].
    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, scope: &str, key: &str) -> T {
        match self.read_json(scope, key).await {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(err) => {
                warn!(scope, key, error = %err, "discarding unreadable local record");
                T::default()
            }
        }
    }

    /// Like `load_or_default`, but a failing database is an error instead of
    /// an empty record, so the caller never writes a blank list over data it
    /// could not read. Malformed records still read as the default.
    pub async fn load_for_update<T: DeserializeOwned + Default>(
        &self,
        scope: &str,
        key: &str,
    ) -> Result<T, AppError> {
        let Some(raw) = self.read(scope, key).await? else {
            return Ok(T::default());
        };
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(scope, key, error = %err, "replacing malformed local record");
                Ok(T::default())
            }
        }
    }

    /// Read-modify-write of one record under the scope lock. `change` returns
    /// its result and whether the record must be written back.
    pub async fn update_json<T, R, F>(&self, scope: &str, key: &str, change: F) -> Result<R, AppError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> (R, bool),
    {
        let _guard = self.lock_scope(scope).await;
        let mut record: T = self.load_for_update(scope, key).await?;
        let (result, dirty) = change(&mut record);
        if dirty {
            self.write_json(scope, key, &record).await?;
        }
        Ok(result)
    }
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|err| AppError::Other(err.into()))
}
