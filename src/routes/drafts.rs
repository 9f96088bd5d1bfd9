use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{draft::Draft, package::TripPackage, trip::CompletedTrip},
    routes::live_events,
    services::sync::DraftSync,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_drafts).post(save_draft))
        .route("/events", get(draft_events))
        .route("/remote", get(list_remote_drafts))
        .route("/:id", get(get_draft).delete(delete_draft))
        .route("/:id/complete", post(complete_draft))
        .route("/:id/sync", post(sync_draft))
}

#[derive(Serialize)]
struct DraftSummary {
    #[serde(flatten)]
    draft: Draft,
    selection_count: usize,
    budget_total: Option<i64>,
}

impl From<Draft> for DraftSummary {
    fn from(draft: Draft) -> Self {
        let (selection_count, budget_total) = match draft.package() {
            Ok(package) => (
                package.selection_count(),
                package.budget().ok().map(|budget| budget.total),
            ),
            Err(err) => {
                warn!(draft_id = %draft.id, error = %err, "draft content unreadable");
                (0, None)
            }
        };
        Self {
            draft,
            selection_count,
            budget_total,
        }
    }
}

async fn list_drafts(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<DraftSummary>>, AppError> {
    let user = current.require_user()?;
    let drafts = state.drafts.get_all_drafts(&user.id).await;
    Ok(Json(drafts.into_iter().map(DraftSummary::from).collect()))
}

#[derive(Deserialize)]
struct SaveDraftBody {
    id: Option<String>,
    name: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    package: Option<TripPackage>,
    content: Option<Value>,
}

fn default_kind() -> String {
    "package".to_string()
}

async fn save_draft(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(body): Json<SaveDraftBody>,
) -> Result<Json<Draft>, AppError> {
    let user = current.require_user()?;
    let existing = match body.id.as_deref() {
        Some(id) => state.drafts.get_draft(&user.id, id).await,
        None => None,
    };
    let mut draft = existing.unwrap_or_else(|| {
        let mut fresh = Draft::new(&user.id, body.name.clone(), body.kind.clone());
        if let Some(id) = body.id.clone() {
            fresh.id = id;
        }
        fresh
    });
    draft.name = body.name;
    draft.kind = body.kind;
    match (body.package, body.content) {
        (Some(package), _) => {
            package
                .budget()
                .map_err(|err| AppError::BadRequest(err.to_string()))?;
            draft.set_package(&package);
        }
        (None, Some(content)) => draft.content = content,
        (None, None) => {}
    }
    let saved = state.drafts.save_draft(&user.id, draft).await?;
    state.live_drafts.refresh(&user.id).await;
    Ok(Json(saved))
}

async fn draft_events(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let live = state.live_drafts.mount(&user.id).await;
    Ok(live_events(live))
}

async fn get_draft(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Draft>, AppError> {
    let user = current.require_user()?;
    let draft = state
        .drafts
        .get_draft(&user.id, &id)
        .await
        .ok_or(AppError::NotFound)?;
    Ok(Json(draft))
}

/// Local delete always happens and is published to open streams; the
/// backend copy is removed afterwards when remote sync is configured.
async fn delete_draft(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    state.live_drafts.delete_draft(&user.id, &id).await?;
    if let Some(remote) = state.remote.as_ref() {
        remote
            .with_token(user.access_token.clone())
            .delete_draft(&id)
            .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct CompleteBody {
    name: Option<String>,
}

async fn complete_draft(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<CompleteBody>>,
) -> Result<(StatusCode, Json<CompletedTrip>), AppError> {
    let user = current.require_user()?;
    let Json(body) = body.unwrap_or_default();
    let trip = match state.remote.as_ref() {
        Some(remote) => {
            DraftSync::new(state.drafts.clone(), remote.with_token(user.access_token.clone()))
                .complete(&state.trips, &user.id, &id, body.name)
                .await?
        }
        None => {
            state
                .trips
                .complete_draft(&state.drafts, &user.id, &id, body.name)
                .await?
        }
    };
    state.live_drafts.refresh(&user.id).await;
    state.live_trips.refresh(&user.id).await;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn sync_draft(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Draft>, AppError> {
    let user = current.require_user()?;
    let remote = state.remote.as_ref().ok_or(AppError::RemoteDisabled)?;
    let sync = DraftSync::new(state.drafts.clone(), remote.with_token(user.access_token.clone()));
    let mirrored = sync.mirror(&user.id, &id).await?;
    state.live_drafts.refresh(&user.id).await;
    Ok(Json(mirrored))
}

#[derive(Serialize)]
struct RemoteListing {
    fetched_at: chrono::DateTime<Utc>,
    drafts: Vec<Draft>,
}

async fn list_remote_drafts(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<RemoteListing>, AppError> {
    let user = current.require_user()?;
    let remote = state.remote.as_ref().ok_or(AppError::RemoteDisabled)?;
    let drafts = remote
        .with_token(user.access_token.clone())
        .get_drafts(&user.id)
        .await?;
    Ok(Json(RemoteListing {
        fetched_at: Utc::now(),
        drafts,
    }))
}
