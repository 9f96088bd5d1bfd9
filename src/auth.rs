use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    PrivateCookieJar,
};
use tracing::warn;

use crate::{error::AppError, state::AppState};

pub const SESSION_COOKIE: &str = "voyage_session";
pub const LOGIN_PATH: &str = "/login";

const PUBLIC_PATHS: [&str; 3] = ["/", LOGIN_PATH, "/logout"];

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
    pub access_token: String,
}

impl AuthenticatedUser {
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Continue,
    Unauthorized,
    RedirectToLogin(String),
    RedirectHome,
}

/// Route gating: anonymous visitors of protected pages go to the login page
/// with a return URL, API calls get 401, signed-in users skip the login page.
pub fn access_decision(method: &Method, path_and_query: &str, signed_in: bool) -> AccessDecision {
    let path = path_and_query.split('?').next().unwrap_or("/");
    let public = PUBLIC_PATHS.contains(&path);

    if signed_in {
        if path == LOGIN_PATH && method == Method::GET {
            return AccessDecision::RedirectHome;
        }
        return AccessDecision::Continue;
    }
    if public {
        return AccessDecision::Continue;
    }
    if path.starts_with("/api/") {
        return AccessDecision::Unauthorized;
    }
    AccessDecision::RedirectToLogin(login_redirect(path_and_query))
}

pub fn login_redirect(return_to: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("redirectedFrom", return_to)
        .finish();
    format!("{LOGIN_PATH}?{query}")
}

/// Only same-site absolute paths are honoured as return targets. Browsers
/// read `/\host` like `//host`, so a backslash after the leading slash is
/// refused as well.
pub fn safe_return_path(candidate: Option<&str>) -> &str {
    match candidate {
        Some(path)
            if path.starts_with('/')
                && !matches!(path.as_bytes().get(1), Some(b'/') | Some(b'\\')) =>
        {
            path
        }
        _ => "/",
    }
}

pub async fn resolve_session(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match jar.get(SESSION_COOKIE) {
        Some(cookie) => lookup_user(&state, cookie.value()).await,
        None => None,
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    match access_decision(request.method(), &path_and_query, user.is_some()) {
        AccessDecision::Continue => {}
        AccessDecision::Unauthorized => return AppError::Unauthorized.into_response(),
        AccessDecision::RedirectToLogin(target) => return Redirect::to(&target).into_response(),
        AccessDecision::RedirectHome => return Redirect::to("/").into_response(),
    }

    if let Some(user) = user {
        state.followers.ensure(&user.id, &user.access_token).await;
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

async fn lookup_user(state: &AppState, access_token: &str) -> Option<AuthenticatedUser> {
    let client = state.supabase.as_ref()?;
    match client.get_user(access_token).await {
        Ok(Some(user)) => Some(AuthenticatedUser {
            id: user.id,
            email: user.email,
            access_token: access_token.to_string(),
        }),
        Ok(None) => None,
        Err(err) => {
            warn!(error = %err, "session lookup failed");
            None
        }
    }
}

pub fn apply_session_cookie(jar: PrivateCookieJar, access_token: &str) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, access_token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/").build())
}
