use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    models::{
        draft::{Draft, DraftPatch, NewDraft},
        trip::CompletedTrip,
    },
    services::{
        drafts::{upsert, LocalDraftStore},
        live::LiveDrafts,
        realtime::{ChangeKind, DraftChange, SubscriptionHandle},
        remote_drafts::RemoteDraftService,
        trips::LocalTripStore,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    Store(Draft),
    Remove(String),
    Ignore,
}

/// Last write wins on `updated_at`. Ties keep the local copy.
pub fn merge(local: Option<&Draft>, change: &DraftChange) -> MergeDecision {
    match change.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(remote) = change.record.as_ref() else {
                return MergeDecision::Ignore;
            };
            match local {
                Some(local) if local.updated_at >= remote.updated_at => MergeDecision::Ignore,
                _ => MergeDecision::Store(remote.clone()),
            }
        }
        ChangeKind::Delete => match (local, change.id()) {
            (Some(_), Some(id)) => MergeDecision::Remove(id.to_string()),
            _ => MergeDecision::Ignore,
        },
    }
}

/// Reconciles one feed event into the user's local drafts. The comparison
/// and the write happen under the store's lock.
pub async fn apply_change(
    drafts: &LocalDraftStore,
    user_id: &str,
    change: &DraftChange,
) -> Result<MergeDecision, AppError> {
    if let Some(record) = change.record.as_ref() {
        if record.user_id != user_id {
            warn!(user_id, owner = %record.user_id, "ignoring draft event for another user");
            return Ok(MergeDecision::Ignore);
        }
    }
    let decision = drafts
        .update(user_id, |stored| {
            let local = change
                .id()
                .and_then(|id| stored.iter().find(|draft| draft.id == id));
            let decision = merge(local, change);
            let dirty = match &decision {
                MergeDecision::Store(draft) => {
                    upsert(stored, draft.clone());
                    true
                }
                MergeDecision::Remove(id) => {
                    stored.retain(|draft| &draft.id != id);
                    true
                }
                MergeDecision::Ignore => false,
            };
            (decision, dirty)
        })
        .await?;
    debug!(user_id, kind = ?change.kind, ?decision, "applied realtime draft event");
    Ok(decision)
}

#[derive(Clone)]
pub struct DraftSync {
    drafts: LocalDraftStore,
    remote: RemoteDraftService,
    live: Option<LiveDrafts>,
}

impl DraftSync {
    pub fn new(drafts: LocalDraftStore, remote: RemoteDraftService) -> Self {
        Self {
            drafts,
            remote,
            live: None,
        }
    }

    /// Republish the user's live draft list after every applied event.
    pub fn with_live(mut self, live: LiveDrafts) -> Self {
        self.live = Some(live);
        self
    }

    /// Pushes a local draft to the backend. New drafts are created remotely
    /// and re-keyed locally to the id the backend assigned.
    pub async fn mirror(&self, user_id: &str, draft_id: &str) -> Result<Draft, AppError> {
        let draft = self
            .drafts
            .get_draft(user_id, draft_id)
            .await
            .ok_or(AppError::NotFound)?;

        match self.remote.get_draft(&draft.id).await? {
            Some(_) => {
                let updated = self
                    .remote
                    .update_draft(&draft.id, &DraftPatch::from(&draft))
                    .await?;
                self.drafts.replace_draft(user_id, updated).await
            }
            None => {
                let created = self.remote.create_draft(&NewDraft::from(&draft)).await?;
                self.drafts.delete_draft(user_id, &draft.id).await?;
                info!(local_id = %draft.id, remote_id = %created.id, "draft mirrored to backend");
                self.drafts.replace_draft(user_id, created).await
            }
        }
    }

    /// Promotes a draft to a trip, then removes its hosted copy. The trip is
    /// already stored when the backend is asked, so a failed remote delete
    /// is logged rather than returned.
    pub async fn complete(
        &self,
        trips: &LocalTripStore,
        user_id: &str,
        draft_id: &str,
        name: Option<String>,
    ) -> Result<CompletedTrip, AppError> {
        let trip = trips
            .complete_draft(&self.drafts, user_id, draft_id, name)
            .await?;
        if let Err(err) = self.remote.delete_draft(draft_id).await {
            warn!(draft_id, error = %err, "promoted draft is still on the backend");
        }
        Ok(trip)
    }

    /// Subscribes to the user's feed and applies every event locally.
    pub async fn follow(&self, user_id: &str) -> Result<Follower, AppError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DraftChange>();
        let subscription = self
            .remote
            .subscribe_to_drafts(user_id, move |change| {
                let _ = tx.send(change);
            })
            .await?;
        info!(user_id, topic = subscription.topic(), "following draft changes");

        let drafts = self.drafts.clone();
        let live = self.live.clone();
        let user = user_id.to_string();
        let applier = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                match apply_change(&drafts, &user, &change).await {
                    Ok(MergeDecision::Ignore) => {}
                    Ok(_) => {
                        if let Some(live) = live.as_ref() {
                            live.refresh(&user).await;
                        }
                    }
                    Err(err) => warn!(user_id = %user, error = %err, "failed to apply draft event"),
                }
            }
        });

        Ok(Follower {
            subscription,
            applier,
        })
    }
}

pub struct Follower {
    subscription: SubscriptionHandle,
    applier: JoinHandle<()>,
}

impl Follower {
    /// False once the socket closed, errored or was rejected.
    pub fn is_active(&self) -> bool {
        self.subscription.is_active() && !self.applier.is_finished()
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.applier.abort();
    }
}

/// One realtime follower per signed-in user. `None` marks a connection in
/// progress. A follower whose connection ended is replaced on the next
/// `ensure`.
#[derive(Clone)]
pub struct FollowerRegistry {
    live: LiveDrafts,
    remote: Option<RemoteDraftService>,
    active: Arc<Mutex<HashMap<String, Option<Follower>>>>,
}

impl FollowerRegistry {
    pub fn new(live: LiveDrafts, remote: Option<RemoteDraftService>) -> Self {
        Self {
            live,
            remote,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Connected or connecting.
    pub async fn is_following(&self, user_id: &str) -> bool {
        match self.active.lock().await.get(user_id) {
            Some(Some(follower)) => follower.is_active(),
            Some(None) => true,
            None => false,
        }
    }

    /// Starts following in the background unless a live connection exists.
    pub async fn ensure(&self, user_id: &str, access_token: &str) {
        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        {
            let mut active = self.active.lock().await;
            match active.get(user_id) {
                Some(None) => return,
                Some(Some(follower)) if follower.is_active() => return,
                Some(Some(_)) => info!(user_id, "draft feed ended, reconnecting"),
                None => {}
            }
            active.insert(user_id.to_string(), None);
        }

        let sync = DraftSync::new(self.live.source().clone(), remote.with_token(access_token))
            .with_live(self.live.clone());
        let active = Arc::clone(&self.active);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            match sync.follow(&user_id).await {
                Ok(follower) => {
                    let mut active = active.lock().await;
                    if let Some(slot) = active.get_mut(&user_id) {
                        *slot = Some(follower);
                    }
                }
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "could not follow draft changes");
                    active.lock().await.remove(&user_id);
                }
            }
        });
    }

    pub async fn stop(&self, user_id: &str) {
        if self.active.lock().await.remove(user_id).is_some() {
            info!(user_id, "stopped following draft changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn draft(updated_offset: i64) -> Draft {
        let mut draft = Draft::new("u1", "Paris trip", "package");
        draft.id = "d1".into();
        draft.updated_at = Utc::now() + Duration::seconds(updated_offset);
        draft
    }

    fn change(kind: ChangeKind, record: Option<Draft>) -> DraftChange {
        DraftChange {
            kind,
            old_id: record.as_ref().map(|draft| draft.id.clone()),
            record,
            commit_timestamp: None,
        }
    }

    #[test]
    fn newer_remote_update_wins() {
        let local = draft(0);
        let remote = Draft {
            updated_at: local.updated_at + Duration::seconds(5),
            ..local.clone()
        };
        let decision = merge(Some(&local), &change(ChangeKind::Update, Some(remote.clone())));
        assert_eq!(decision, MergeDecision::Store(remote));
    }

    #[test]
    fn stale_or_equal_remote_update_is_ignored() {
        let local = draft(0);
        let stale = Draft {
            updated_at: local.updated_at - Duration::seconds(5),
            ..local.clone()
        };
        assert_eq!(merge(Some(&local), &change(ChangeKind::Update, Some(stale))), MergeDecision::Ignore);
        assert_eq!(
            merge(Some(&local), &change(ChangeKind::Update, Some(local.clone()))),
            MergeDecision::Ignore
        );
    }

    #[test]
    fn insert_without_local_copy_is_stored() {
        let remote = draft(0);
        assert_eq!(
            merge(None, &change(ChangeKind::Insert, Some(remote.clone()))),
            MergeDecision::Store(remote)
        );
    }

    #[test]
    fn delete_only_touches_known_drafts() {
        let local = draft(0);
        let delete = DraftChange {
            kind: ChangeKind::Delete,
            record: None,
            old_id: Some("d1".into()),
            commit_timestamp: None,
        };
        assert_eq!(merge(Some(&local), &delete), MergeDecision::Remove("d1".into()));
        assert_eq!(merge(None, &delete), MergeDecision::Ignore);
    }

    mod followers {
        use std::{
            net::SocketAddr,
            sync::atomic::{AtomicUsize, Ordering},
            time::Duration,
        };

        use futures_util::StreamExt;
        use tokio::{
            net::TcpListener,
            time::{sleep, Instant},
        };
        use url::Url;

        use super::super::*;
        use crate::{
            config::SupabaseConfig,
            db::memory_pool,
            services::{live::LiveRegistry, storage::StorageService, supabase::SupabaseClient},
        };

        /// Accepts websocket clients, reads the channel join and hangs up.
        async fn hanging_up_backend() -> (SocketAddr, Arc<AtomicUsize>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let accepted = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                            return;
                        };
                        let _join = socket.next().await;
                        let _ = socket.close(None).await;
                    });
                }
            });
            (addr, accepted)
        }

        async fn registry(addr: SocketAddr) -> FollowerRegistry {
            let client = SupabaseClient::new(&SupabaseConfig {
                url: Url::parse(&format!("http://{addr}")).unwrap(),
                anon_key: "anon-key".into(),
            });
            let drafts = LocalDraftStore::new(StorageService::new(memory_pool().await));
            FollowerRegistry::new(
                LiveRegistry::new(drafts, Duration::from_secs(3_600)),
                Some(RemoteDraftService::new(client)),
            )
        }

        async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done() {
                assert!(Instant::now() < deadline, "timed out waiting for {what}");
                sleep(Duration::from_millis(20)).await;
            }
        }

        #[tokio::test]
        async fn closed_feed_is_reconnected_on_next_ensure() {
            let (addr, accepted) = hanging_up_backend().await;
            let followers = registry(addr).await;

            followers.ensure("u1", "jwt").await;
            wait_for("first connection", || accepted.load(Ordering::SeqCst) == 1).await;

            let deadline = Instant::now() + Duration::from_secs(5);
            while followers.is_following("u1").await {
                assert!(Instant::now() < deadline, "feed never reported closed");
                sleep(Duration::from_millis(20)).await;
            }

            followers.ensure("u1", "jwt").await;
            wait_for("reconnection", || accepted.load(Ordering::SeqCst) == 2).await;
        }

        #[tokio::test]
        async fn live_follower_is_not_duplicated() {
            let (addr, accepted) = hanging_up_backend().await;
            let followers = registry(addr).await;

            followers.ensure("u1", "jwt").await;
            followers.ensure("u1", "jwt").await;
            wait_for("first connection", || accepted.load(Ordering::SeqCst) >= 1).await;
            sleep(Duration::from_millis(100)).await;
            assert_eq!(accepted.load(Ordering::SeqCst), 1);

            followers.stop("u1").await;
            assert!(!followers.is_following("u1").await);
        }
    }
}
