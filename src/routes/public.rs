use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::{self, CurrentUser},
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(landing))
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", post(logout))
}

#[derive(Serialize)]
struct Landing {
    logged_in: bool,
    user: Option<String>,
    remote_sync: bool,
    following_changes: bool,
}

async fn landing(State(state): State<AppState>, current: CurrentUser) -> Json<Landing> {
    let following_changes = match current.0.as_ref() {
        Some(user) => state.followers.is_following(&user.id).await,
        None => false,
    };
    Json(Landing {
        logged_in: current.0.is_some(),
        user: current.0.as_ref().map(|user| user.display_name().to_string()),
        remote_sync: state.remote.is_some(),
        following_changes,
    })
}

#[derive(Serialize)]
struct LoginInfo {
    method: &'static str,
    fields: [&'static str; 3],
}

async fn login_form() -> Json<LoginInfo> {
    Json(LoginInfo {
        method: "POST",
        fields: ["email", "password", "redirected_from"],
    })
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
    redirected_from: Option<String>,
}

async fn login_submit(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let client = state.supabase.as_ref().ok_or(AppError::RemoteDisabled)?;
    if form.email.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::BadRequest("email and password are required".into()));
    }
    let session = client
        .sign_in_with_password(form.email.trim(), &form.password)
        .await?;
    info!(user_id = %session.user.id, "signed in");
    state
        .followers
        .ensure(&session.user.id, &session.access_token)
        .await;

    let target = auth::safe_return_path(form.redirected_from.as_deref()).to_string();
    Ok((
        auth::apply_session_cookie(jar, &session.access_token),
        Redirect::to(&target),
    )
        .into_response())
}

async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    current: CurrentUser,
) -> (PrivateCookieJar, Redirect) {
    if let Some(user) = current.0.as_ref() {
        state.followers.stop(&user.id).await;
    }
    (auth::clear_session_cookie(jar), Redirect::to("/"))
}
