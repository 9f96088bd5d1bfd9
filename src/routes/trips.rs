use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::trip::CompletedTrip,
    routes::{live_events, notifications::request_join},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_trips))
        .route("/events", get(trip_events))
        .route("/:id", get(get_trip).delete(delete_trip).patch(rename_trip))
        .route("/:id/join-requests", post(request_join))
}

async fn list_trips(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<CompletedTrip>>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.trips.get_all_trips(&user.id).await))
}

async fn trip_events(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let live = state.live_trips.mount(&user.id).await;
    Ok(live_events(live))
}

async fn get_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<CompletedTrip>, AppError> {
    let user = current.require_user()?;
    let trip = state
        .trips
        .get_trip(&user.id, &id)
        .await
        .ok_or(AppError::NotFound)?;
    Ok(Json(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    state.live_trips.delete_trip(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RenameBody {
    name: String,
}

async fn rename_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<CompletedTrip>, AppError> {
    let user = current.require_user()?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("trip name must not be empty".into()));
    }
    let renamed = state
        .live_trips
        .update_trip_name(&user.id, &id, name)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(renamed))
}
