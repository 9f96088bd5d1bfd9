use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use tracing::info;

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        drafts::LocalDraftStore,
        live::{LiveDrafts, LiveRegistry, LiveTrips},
        notifications::NotificationService,
        packages::PackageStore,
        remote_drafts::RemoteDraftService,
        storage::StorageService,
        supabase::SupabaseClient,
        sync::FollowerRegistry,
        trips::LocalTripStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub storage: StorageService,
    pub drafts: LocalDraftStore,
    pub trips: LocalTripStore,
    pub live_drafts: LiveDrafts,
    pub live_trips: LiveTrips,
    pub packages: PackageStore,
    pub notifications: NotificationService,
    pub supabase: Option<SupabaseClient>,
    pub remote: Option<RemoteDraftService>,
    pub followers: FollowerRegistry,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);

        let storage = StorageService::new(db.clone());
        let drafts = LocalDraftStore::new(storage.clone());
        let supabase = config.supabase.as_ref().map(SupabaseClient::new);
        let remote = supabase.clone().map(RemoteDraftService::new);
        if remote.is_none() {
            info!("SUPABASE_URL/SUPABASE_ANON_KEY not set, remote drafts disabled");
        }

        let trips = LocalTripStore::new(storage.clone());
        let live_drafts = LiveRegistry::new(drafts.clone(), config.poll_interval);
        let live_trips = LiveRegistry::new(trips.clone(), config.poll_interval);

        Self {
            followers: FollowerRegistry::new(live_drafts.clone(), remote.clone()),
            trips,
            live_drafts,
            live_trips,
            packages: PackageStore::new(storage.clone()),
            notifications: NotificationService::new(storage.clone()),
            config,
            db,
            storage,
            drafts,
            supabase,
            remote,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
