use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::{
    error::AppError,
    models::{draft::Draft, trip::CompletedTrip},
    services::{drafts::LocalDraftStore, trips::LocalTripStore},
};

/// A local store that can be read in full for one user.
#[async_trait]
pub trait Snapshot: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    async fn snapshot(&self, user_id: &str) -> Vec<Self::Item>;
}

/// Observable list kept fresh by re-reading its store on a fixed interval.
/// Dropping it stops the timer.
pub struct LiveCollection<S: Snapshot> {
    source: Arc<S>,
    user_id: String,
    tx: watch::Sender<Vec<S::Item>>,
    ticker: JoinHandle<()>,
}

impl<S: Snapshot> LiveCollection<S> {
    pub async fn mount(source: Arc<S>, user_id: impl Into<String>, every: Duration) -> Self {
        let user_id = user_id.into();
        let initial = source.snapshot(&user_id).await;
        let (tx, _) = watch::channel(initial);

        let ticker = {
            let source = Arc::clone(&source);
            let user_id = user_id.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut interval = time::interval_at(Instant::now() + every, every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let items = source.snapshot(&user_id).await;
                    tx.send_replace(items);
                }
            })
        };
        debug!(user_id = %user_id, ?every, "live collection mounted");

        Self {
            source,
            user_id,
            tx,
            ticker,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<S::Item>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Vec<S::Item> {
        self.tx.borrow().clone()
    }

    /// Re-reads and publishes immediately instead of waiting for the next tick.
    pub async fn refresh(&self) -> Vec<S::Item> {
        let items = self.source.snapshot(&self.user_id).await;
        self.tx.send_replace(items.clone());
        items
    }

    pub fn unmount(self) {}
}

impl<S: Snapshot> Drop for LiveCollection<S> {
    fn drop(&mut self) {
        self.ticker.abort();
        debug!(user_id = %self.user_id, "live collection unmounted");
    }
}

impl LiveCollection<LocalDraftStore> {
    pub async fn delete_draft(&self, id: &str) -> Result<Vec<Draft>, AppError> {
        self.source.delete_draft(&self.user_id, id).await?;
        Ok(self.refresh().await)
    }
}

impl LiveCollection<LocalTripStore> {
    pub async fn delete_trip(&self, id: &str) -> Result<Vec<CompletedTrip>, AppError> {
        self.source.delete_trip(&self.user_id, id).await?;
        Ok(self.refresh().await)
    }

    /// `None` when no trip has this id; the list is republished either way.
    pub async fn update_trip_name(
        &self,
        id: &str,
        new_name: &str,
    ) -> Result<Option<CompletedTrip>, AppError> {
        let renamed = self
            .source
            .update_trip_name(&self.user_id, id, new_name)
            .await?;
        self.refresh().await;
        Ok(renamed)
    }
}

/// The mounted live collection of every user, shared by all of that user's
/// streams. Mutations made through the registry republish before returning
/// so subscribers never wait for the next tick. Entries are weak: the
/// collection unmounts once its last stream is gone.
pub struct LiveRegistry<S: Snapshot> {
    source: Arc<S>,
    every: Duration,
    mounted: Arc<Mutex<HashMap<String, Weak<LiveCollection<S>>>>>,
}

impl<S: Snapshot> Clone for LiveRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            every: self.every,
            mounted: Arc::clone(&self.mounted),
        }
    }
}

impl<S: Snapshot> LiveRegistry<S> {
    pub fn new(source: S, every: Duration) -> Self {
        Self {
            source: Arc::new(source),
            every,
            mounted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The user's collection if one is mounted.
    pub fn get(&self, user_id: &str) -> Option<Arc<LiveCollection<S>>> {
        let mut mounted = self.mounted.lock().unwrap_or_else(PoisonError::into_inner);
        let live = mounted.get(user_id).and_then(Weak::upgrade);
        if live.is_none() {
            mounted.remove(user_id);
        }
        live
    }

    /// Joins the user's mounted collection or mounts a new one.
    pub async fn mount(&self, user_id: &str) -> Arc<LiveCollection<S>> {
        if let Some(live) = self.get(user_id) {
            return live;
        }
        let fresh = Arc::new(LiveCollection::mount(Arc::clone(&self.source), user_id, self.every).await);
        let mut mounted = self.mounted.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(raced) = mounted.get(user_id).and_then(Weak::upgrade) {
            return raced;
        }
        mounted.insert(user_id.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    /// Republishes the user's collection after a change made elsewhere.
    pub async fn refresh(&self, user_id: &str) {
        if let Some(live) = self.get(user_id) {
            live.refresh().await;
        }
    }
}

pub type LiveDrafts = LiveRegistry<LocalDraftStore>;
pub type LiveTrips = LiveRegistry<LocalTripStore>;

impl LiveRegistry<LocalDraftStore> {
    pub async fn delete_draft(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        match self.get(user_id) {
            Some(live) => live.delete_draft(id).await.map(drop),
            None => self.source.delete_draft(user_id, id).await,
        }
    }
}

impl LiveRegistry<LocalTripStore> {
    pub async fn delete_trip(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        match self.get(user_id) {
            Some(live) => live.delete_trip(id).await.map(drop),
            None => self.source.delete_trip(user_id, id).await,
        }
    }

    pub async fn update_trip_name(
        &self,
        user_id: &str,
        id: &str,
        new_name: &str,
    ) -> Result<Option<CompletedTrip>, AppError> {
        match self.get(user_id) {
            Some(live) => live.update_trip_name(id, new_name).await,
            None => self.source.update_trip_name(user_id, id, new_name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl Snapshot for Counting {
        type Item = usize;

        async fn snapshot(&self, _user_id: &str) -> Vec<usize> {
            vec![self.reads.fetch_add(1, Ordering::SeqCst) + 1]
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_on_mount_and_every_tick() {
        let source = Arc::new(Counting::default());
        let live = LiveCollection::mount(Arc::clone(&source), "u1", Duration::from_secs(2)).await;
        assert_eq!(live.current(), vec![1]);

        time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);

        let mut rx = live.subscribe();
        time::sleep(Duration::from_millis(200)).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), vec![2]);

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_ticking_after_unmount() {
        let source = Arc::new(Counting::default());
        let live = LiveCollection::mount(Arc::clone(&source), "u1", Duration::from_secs(2)).await;
        time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);

        live.unmount();
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_publishes_without_waiting() {
        let source = Arc::new(Counting::default());
        let live = LiveCollection::mount(Arc::clone(&source), "u1", Duration::from_secs(2)).await;
        let mut rx = live.subscribe();
        assert_eq!(live.refresh().await, vec![2]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_shares_one_collection_per_user() {
        let registry = LiveRegistry::new(Counting::default(), Duration::from_secs(2));
        let first = registry.mount("u1").await;
        let second = registry.mount("u1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.source().reads.load(Ordering::SeqCst), 1);

        let mut rx = first.subscribe();
        registry.refresh("u1").await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), vec![2]);

        drop(first);
        drop(second);
        assert!(registry.get("u1").is_none());
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.source().reads.load(Ordering::SeqCst), 2);
    }

    mod stores {
        use super::*;
        use crate::{
            db::memory_pool,
            models::{package::TripPackage, trip::CompletedTrip},
            services::storage::StorageService,
        };

        const NEVER: Duration = Duration::from_secs(3_600);

        async fn storage() -> StorageService {
            StorageService::new(memory_pool().await)
        }

        fn draft(id: &str) -> Draft {
            let mut draft = Draft::new("u1", "Paris trip", "package");
            draft.id = id.into();
            draft
        }

        fn trip(name: &str) -> CompletedTrip {
            let package = TripPackage {
                origin: Some("BER".into()),
                destination: Some("Paris".into()),
                start_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1),
                end_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 4),
                ..Default::default()
            };
            CompletedTrip::from_package(name, &package).unwrap()
        }

        #[tokio::test]
        async fn deleting_a_draft_republishes_before_the_next_tick() {
            let drafts = LocalDraftStore::new(storage().await);
            drafts.save_draft("u1", draft("d1")).await.unwrap();
            drafts.save_draft("u1", draft("d2")).await.unwrap();

            let registry = LiveRegistry::new(drafts, NEVER);
            let live = registry.mount("u1").await;
            let mut rx = live.subscribe();
            assert_eq!(live.current().len(), 2);

            registry.delete_draft("u1", "d1").await.unwrap();
            assert!(rx.has_changed().unwrap());
            let ids: Vec<String> = rx.borrow_and_update().iter().map(|d| d.id.clone()).collect();
            assert_eq!(ids, vec!["d2".to_string()]);
        }

        #[tokio::test]
        async fn trip_changes_republish_before_the_next_tick() {
            let trips = LocalTripStore::new(storage().await);
            let saved = trips.save_trip("u1", trip("Paris in June")).await.unwrap();
            let other = trips.save_trip("u1", trip("Rome")).await.unwrap();

            let registry = LiveRegistry::new(trips, NEVER);
            let live = registry.mount("u1").await;
            let mut rx = live.subscribe();

            let renamed = registry
                .update_trip_name("u1", &saved.id, "Paris with friends")
                .await
                .unwrap();
            assert_eq!(renamed.map(|t| t.name), Some("Paris with friends".to_string()));
            assert!(rx.has_changed().unwrap());
            assert!(rx
                .borrow_and_update()
                .iter()
                .any(|t| t.name == "Paris with friends"));

            assert!(registry.update_trip_name("u1", "nope", "Ghost").await.unwrap().is_none());

            registry.delete_trip("u1", &other.id).await.unwrap();
            assert!(rx.has_changed().unwrap());
            assert_eq!(rx.borrow_and_update().len(), 1);
        }

        #[tokio::test]
        async fn mutations_without_a_mounted_collection_still_apply() {
            let drafts = LocalDraftStore::new(storage().await);
            drafts.save_draft("u1", draft("d1")).await.unwrap();
            let registry = LiveRegistry::new(drafts, NEVER);

            registry.delete_draft("u1", "d1").await.unwrap();
            assert!(registry.source().get_all_drafts("u1").await.is_empty());
        }
    }
}
