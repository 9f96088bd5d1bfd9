use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{
        join_request::JoinRequest,
        notification::{NotificationSender, TripNotification},
    },
    services::notifications::{JoinRequestInput, Transition},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/clear", post(clear_all))
        .route("/api/notifications/:id/read", post(mark_read))
        .route("/api/join-requests/:id/approve", post(approve))
        .route("/api/join-requests/:id/reject", post(reject))
}

#[derive(Serialize)]
struct Inbox {
    unread: usize,
    items: Vec<TripNotification>,
}

async fn list_notifications(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Inbox>, AppError> {
    let user = current.require_user()?;
    let book = state.notifications.load().await;
    Ok(Json(Inbox {
        unread: book.unread_count(&user.id),
        items: book.for_viewer(&user.id),
    }))
}

#[derive(Serialize)]
struct Changed {
    changed: usize,
}

async fn mark_all_read(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Changed>, AppError> {
    let user = current.require_user()?;
    let changed = state.notifications.mark_all_read(&user.id).await?;
    Ok(Json(Changed { changed }))
}

async fn clear_all(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Changed>, AppError> {
    let user = current.require_user()?;
    let changed = state.notifications.clear_all(&user.id).await?;
    Ok(Json(Changed { changed }))
}

async fn mark_read(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    if state.notifications.mark_read(&user.id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

#[derive(Deserialize)]
pub(crate) struct JoinBody {
    owner_id: String,
    requester_name: Option<String>,
    #[serde(default)]
    message: String,
}

/// The trip is looked up in its owner's store so the request carries the
/// current trip name.
pub(crate) async fn request_join(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
    Json(body): Json<JoinBody>,
) -> Result<(StatusCode, Json<JoinRequest>), AppError> {
    let user = current.require_user()?;
    let trip = state
        .trips
        .get_trip(&body.owner_id, &trip_id)
        .await
        .ok_or(AppError::NotFound)?;
    let requester_name = body
        .requester_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| user.display_name().to_string());
    let request = state
        .notifications
        .request_join(JoinRequestInput {
            trip_id: trip.id,
            trip_name: trip.name,
            owner_id: body.owner_id,
            requester_id: user.id.clone(),
            requester_name,
            requester_email: user.email.clone().unwrap_or_default(),
            message: body.message,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Serialize)]
struct Answer {
    applied: bool,
    notification: Option<TripNotification>,
}

impl From<Transition> for Answer {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Applied(notification) => Self {
                applied: true,
                notification: Some(notification),
            },
            Transition::NoEffect => Self {
                applied: false,
                notification: None,
            },
        }
    }
}

async fn approve(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Answer>, AppError> {
    answer(state, current, id, true).await
}

async fn reject(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Answer>, AppError> {
    answer(state, current, id, false).await
}

async fn answer(
    state: AppState,
    current: CurrentUser,
    request_id: String,
    approve: bool,
) -> Result<Json<Answer>, AppError> {
    let user = current.require_user()?;
    let owner = NotificationSender {
        name: user.display_name().to_string(),
        email: user.email.clone().unwrap_or_default(),
    };
    let transition = state
        .notifications
        .respond(&user.id, owner, &request_id, approve)
        .await?;
    Ok(Json(transition.into()))
}
