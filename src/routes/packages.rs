use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use tracing::debug;

use crate::{auth::CurrentUser, error::AppError, models::package::TripPackage, state::AppState};

/// Where unknown packages send the visitor.
pub const PACKAGE_FALLBACK: &str = "/trips";

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/:id",
        get(get_package).put(put_package).delete(delete_package),
    )
}

pub fn page_router() -> Router<AppState> {
    Router::new().route("/packages/:id", get(package_page))
}

async fn package_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let user = current.require_user()?;
    match state.packages.get_package(&user.id, &id).await {
        Some(package) => Ok(Json(package).into_response()),
        None => {
            debug!(package_id = %id, "unknown package, redirecting to listing");
            Ok(Redirect::to(PACKAGE_FALLBACK).into_response())
        }
    }
}

async fn get_package(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<TripPackage>, AppError> {
    let user = current.require_user()?;
    let package = state
        .packages
        .get_package(&user.id, &id)
        .await
        .ok_or(AppError::NotFound)?;
    Ok(Json(package))
}

async fn put_package(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(package): Json<TripPackage>,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    package
        .budget()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;
    state.packages.save_package(&user.id, &id, &package).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_package(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    state.packages.delete_package(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
