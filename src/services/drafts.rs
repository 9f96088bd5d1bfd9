use async_trait::async_trait;
use chrono::Utc;

use crate::{
    error::AppError, models::draft::Draft, services::live::Snapshot,
    services::storage::StorageService,
};

pub const DRAFTS_KEY: &str = "travel-drafts";

#[derive(Clone)]
pub struct LocalDraftStore {
    storage: StorageService,
}

impl LocalDraftStore {
    pub fn new(storage: StorageService) -> Self {
        Self { storage }
    }

    /// Most recently updated first. Corrupt or missing storage reads as empty.
    pub async fn get_all_drafts(&self, user_id: &str) -> Vec<Draft> {
        let mut drafts: Vec<Draft> = self.storage.load_or_default(user_id, DRAFTS_KEY).await;
        drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        drafts
    }

    pub async fn get_draft(&self, user_id: &str, id: &str) -> Option<Draft> {
        self.get_all_drafts(user_id)
            .await
            .into_iter()
            .find(|draft| draft.id == id)
    }

    /// Inserts or replaces by id and stamps `updated_at`.
    pub async fn save_draft(&self, user_id: &str, mut draft: Draft) -> Result<Draft, AppError> {
        if draft.id.trim().is_empty() {
            return Err(AppError::BadRequest("draft id must not be empty".into()));
        }
        let now = Utc::now();
        if now > draft.updated_at {
            draft.updated_at = now;
        }
        self.replace_draft(user_id, draft).await
    }

    /// Like `save_draft` but keeps the record's own timestamps.
    pub async fn replace_draft(&self, user_id: &str, draft: Draft) -> Result<Draft, AppError> {
        self.update(user_id, |drafts| {
            upsert(drafts, draft.clone());
            ((), true)
        })
        .await?;
        Ok(draft)
    }

    /// Absent ids are not an error.
    pub async fn delete_draft(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        self.update(user_id, |drafts| {
            let before = drafts.len();
            drafts.retain(|draft| draft.id != id);
            ((), drafts.len() != before)
        })
        .await
    }

    /// Atomic read-modify-write of the user's drafts; see
    /// [`StorageService::update_json`].
    pub async fn update<R>(
        &self,
        user_id: &str,
        change: impl FnOnce(&mut Vec<Draft>) -> (R, bool),
    ) -> Result<R, AppError> {
        self.storage
            .update_json(user_id, DRAFTS_KEY, |drafts: &mut Vec<Draft>| {
                let (result, dirty) = change(drafts);
                if dirty {
                    drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                }
                (result, dirty)
            })
            .await
    }
}

pub(crate) fn upsert(drafts: &mut Vec<Draft>, draft: Draft) {
    match drafts.iter_mut().find(|existing| existing.id == draft.id) {
        Some(existing) => *existing = draft,
        None => drafts.push(draft),
    }
}

#[async_trait]
impl Snapshot for LocalDraftStore {
    type Item = Draft;

    async fn snapshot(&self, user_id: &str) -> Vec<Draft> {
        self.get_all_drafts(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::memory_pool;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_keep_every_draft() {
        let store = Arc::new(LocalDraftStore::new(StorageService::new(memory_pool().await)));
        let saves: Vec<_> = (0..20)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut draft = Draft::new("alice", format!("Trip {n}"), "package");
                    draft.id = format!("d{n}");
                    store.save_draft("alice", draft).await
                })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }
        assert_eq!(store.get_all_drafts("alice").await.len(), 20);
    }

    #[tokio::test]
    async fn deleting_an_unknown_draft_leaves_storage_alone() {
        let storage = StorageService::new(memory_pool().await);
        let store = LocalDraftStore::new(storage.clone());
        let mut draft = Draft::new("alice", "Paris trip", "package");
        draft.id = "d1".into();
        store.save_draft("alice", draft).await.unwrap();
        let before = storage.read("alice", DRAFTS_KEY).await.unwrap();

        store.delete_draft("alice", "missing").await.unwrap();
        assert_eq!(storage.read("alice", DRAFTS_KEY).await.unwrap(), before);
    }
}
